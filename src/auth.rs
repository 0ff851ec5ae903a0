use crate::api::AppState;
use crate::config::AuthConfig;
use crate::error::Error;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (shared service identity)
    pub sub: String,
    /// Issued at (unix timestamp)
    pub iat: i64,
    /// Expiration (unix timestamp)
    pub exp: i64,
}

/// Marker extracted from a validated bearer token
#[derive(Debug, Clone)]
pub struct AuthorizedClient {
    pub subject: String,
}

fn algorithm(auth_config: &AuthConfig) -> Result<Algorithm, Error> {
    match auth_config.jwt_algorithm.as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(Error::Config {
            msg: format!("unsupported jwt algorithm: {}", other),
        }),
    }
}

/// Mint a token for the configured subject
pub fn create_jwt(auth_config: &AuthConfig) -> Result<String, Error> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: auth_config.jwt_subject.clone(),
        iat: now,
        exp: now + auth_config.jwt_duration_secs,
    };

    jsonwebtoken::encode(
        &Header::new(algorithm(auth_config)?),
        &claims,
        &EncodingKey::from_secret(auth_config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("failed to create token: {}", e);
        Error::Unauthorized
    })
}

/// Validate a token's signature, expiry and subject
pub fn validate_jwt(auth_config: &AuthConfig, token: &str) -> Result<Claims, Error> {
    let mut validation = Validation::new(algorithm(auth_config)?);
    validation.validate_exp = true;

    let claims = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(auth_config.jwt_secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|_| Error::Unauthorized)?;

    if claims.sub != auth_config.jwt_subject {
        return Err(Error::Unauthorized);
    }
    Ok(claims)
}

impl FromRequestParts<Arc<AppState>> for AuthorizedClient {
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let auth_config = &state.config.auth;

        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(Error::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(Error::Unauthorized)?;

        // development escape hatch: a configured literal token skips validation
        if let Some(bypass) = &auth_config.bypass_token {
            if token == bypass {
                return Ok(AuthorizedClient {
                    subject: "<bypass>".to_string(),
                });
            }
        }

        let claims = validate_jwt(auth_config, token)?;
        Ok(AuthorizedClient {
            subject: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_validate() {
        let auth = AuthConfig::default();
        let token = create_jwt(&auth).unwrap();
        let claims = validate_jwt(&auth, &token).unwrap();
        assert_eq!(claims.sub, auth.jwt_subject);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = AuthConfig::default();
        let token = create_jwt(&auth).unwrap();

        let mut other = AuthConfig::default();
        other.jwt_secret = "a different secret".to_string();
        assert!(validate_jwt(&other, &token).is_err());
    }

    #[test]
    fn test_wrong_subject_rejected() {
        let mut issuer = AuthConfig::default();
        issuer.jwt_subject = "someone else".to_string();
        let token = create_jwt(&issuer).unwrap();

        let auth = AuthConfig::default();
        assert!(validate_jwt(&auth, &token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut auth = AuthConfig::default();
        auth.jwt_duration_secs = -120;
        let token = create_jwt(&auth).unwrap();
        assert!(validate_jwt(&auth, &token).is_err());
    }
}
