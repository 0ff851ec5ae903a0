use crate::error::{Error, Result};
use crate::models::catalog;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// File version: a concrete number (>= 1) or a symbolic form resolved against
/// the versions already on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Number(u32),
    Next,
    Latest,
    Previous,
    First,
    Second,
}

impl Version {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.chars().all(|c| c.is_ascii_digit()) && !value.is_empty() {
            let n: u32 = value.parse().map_err(|_| Error::Validation {
                msg: format!("invalid version number: {}", value),
            })?;
            if n == 0 {
                return Err(Error::Validation {
                    msg: "version 0 is not a valid file version".to_string(),
                });
            }
            return Ok(Version::Number(n));
        }
        match value.to_lowercase().as_str() {
            "next" => Ok(Version::Next),
            "latest" | "last" => Ok(Version::Latest),
            "prev" | "previous" => Ok(Version::Previous),
            "first" => Ok(Version::First),
            "second" => Ok(Version::Second),
            other => Err(Error::Validation {
                msg: format!("unrecognized version: {}", other),
            }),
        }
    }

    pub fn is_symbolic(&self) -> bool {
        !matches!(self, Version::Number(_))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Version::Number(n) => write!(f, "{}", n),
            Version::Next => write!(f, "next"),
            Version::Latest => write!(f, "latest"),
            Version::Previous => write!(f, "previous"),
            Version::First => write!(f, "first"),
            Version::Second => write!(f, "second"),
        }
    }
}

/// Digest algorithms accepted for integrity verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum HashKind {
    MD5,
    SHA1,
    SHA256,
}

impl HashKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.to_uppercase().as_str() {
            "MD5" => Ok(HashKind::MD5),
            "SHA1" => Ok(HashKind::SHA1),
            "SHA256" => Ok(HashKind::SHA256),
            other => Err(Error::Validation {
                msg: format!("unsupported hash type: {}", other),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HashKind::MD5 => "MD5",
            HashKind::SHA1 => "SHA1",
            HashKind::SHA256 => "SHA256",
        }
    }
}

/// The seven-tuple identifying a deposition artifact independent of disk layout
#[derive(Debug, Clone)]
pub struct LogicalFile {
    pub repository_type: String,
    pub dep_id: String,
    pub content_type: String,
    pub milestone: Option<String>,
    pub part_number: u32,
    pub content_format: String,
    pub version: Version,
}

impl LogicalFile {
    /// Validate every component against the fixed catalog
    pub fn validate(&self) -> Result<()> {
        if catalog::normalize_repository_type(&self.repository_type).is_none() {
            return Err(Error::Validation {
                msg: format!("unknown repository type: {}", self.repository_type),
            });
        }
        if self.dep_id.is_empty() {
            return Err(Error::Validation {
                msg: "deposit id must not be empty".to_string(),
            });
        }
        if !catalog::is_permitted_combination(&self.content_type, &self.content_format) {
            return Err(Error::Validation {
                msg: format!(
                    "content type {} does not permit format {}",
                    self.content_type, self.content_format
                ),
            });
        }
        if let Some(milestone) = &self.milestone {
            if !catalog::is_valid_milestone(milestone) {
                return Err(Error::Validation {
                    msg: format!("unknown milestone: {}", milestone),
                });
            }
        }
        if self.part_number == 0 {
            return Err(Error::Validation {
                msg: "part number must be >= 1".to_string(),
            });
        }
        Ok(())
    }

    /// Milestone normalized for requests where an empty string means absent
    pub fn normalize_milestone(milestone: Option<String>) -> Option<String> {
        milestone.filter(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(version: Version) -> LogicalFile {
        LogicalFile {
            repository_type: "deposit".to_string(),
            dep_id: "D_1000000001".to_string(),
            content_type: "model".to_string(),
            milestone: None,
            part_number: 1,
            content_format: "pdbx".to_string(),
            version,
        }
    }

    #[test]
    fn test_version_parsing() {
        assert_eq!(Version::parse("3").unwrap(), Version::Number(3));
        assert_eq!(Version::parse("next").unwrap(), Version::Next);
        assert_eq!(Version::parse("LATEST").unwrap(), Version::Latest);
        assert_eq!(Version::parse("last").unwrap(), Version::Latest);
        assert_eq!(Version::parse("prev").unwrap(), Version::Previous);
        assert!(Version::parse("0").is_err());
        assert!(Version::parse("nope").is_err());
        assert!(Version::parse("").is_err());
    }

    #[test]
    fn test_logical_file_validation() {
        assert!(model(Version::Next).validate().is_ok());

        let mut bad = model(Version::Next);
        bad.content_format = "pdf".to_string();
        assert!(bad.validate().is_err());

        let mut bad = model(Version::Next);
        bad.milestone = Some("launch".to_string());
        assert!(bad.validate().is_err());

        let mut ok = model(Version::Next);
        ok.milestone = Some("release".to_string());
        assert!(ok.validate().is_ok());
    }
}
