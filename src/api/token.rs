use crate::api::AppState;
use crate::auth;
use crate::error::Result;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct TokenResponse {
    pub token: String,
}

/// Issue a bearer token for the configured subject
#[utoipa::path(
    get,
    path = "/token",
    responses((status = 200, description = "Signed token", body = TokenResponse)),
    tag = "token"
)]
pub async fn get_token(State(state): State<Arc<AppState>>) -> Result<Json<TokenResponse>> {
    let token = auth::create_jwt(&state.config.auth)?;
    Ok(Json(TokenResponse { token }))
}

/// Check a token's signature, expiry and subject
#[utoipa::path(
    get,
    path = "/validate-token/{token}",
    params(("token" = String, Path, description = "Token to validate")),
    responses(
        (status = 200, description = "Token claims"),
        (status = 403, description = "Invalid or expired token")
    ),
    tag = "token"
)]
pub async fn validate_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Json<auth::Claims>> {
    let claims = auth::validate_jwt(&state.config.auth, &token)?;
    Ok(Json(claims))
}
