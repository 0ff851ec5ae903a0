use derive_more::Display;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display)]
pub enum Error {
    #[display("IO error at {path}: {error}")]
    Io { error: std::io::Error, path: String },

    #[display("Invalid request: {msg}")]
    Validation { msg: String },

    #[display("Path not found: {msg}")]
    NotFound { msg: String },

    #[display("Overwrite prohibited: {path}")]
    OverwriteProhibited { path: String },

    #[display("Integrity check failed: {msg}")]
    Integrity { msg: String },

    #[display("Lock timed out on {key}")]
    LockTimeout { key: String },

    #[display("Lock error: {msg}")]
    Lock { msg: String },

    #[display("Upload protocol error: {msg}")]
    Protocol { msg: String },

    #[display("Unauthorized")]
    Unauthorized,

    #[display("Key-value store error: {msg}")]
    Kv { msg: String },

    #[display("Configuration error: {msg}")]
    Config { msg: String },
}

impl std::error::Error for Error {}

// Implement From<std::io::Error> for cases where path context is not available
impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Io {
            error,
            path: "<unknown>".to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Kv {
            msg: format!("serialization failed: {}", error),
        }
    }
}

// Single place where error kinds map to HTTP status codes
impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            Error::Validation { msg } => (axum::http::StatusCode::BAD_REQUEST, msg.clone()),
            Error::NotFound { msg } => (axum::http::StatusCode::NOT_FOUND, msg.clone()),
            Error::OverwriteProhibited { path } => (
                axum::http::StatusCode::FORBIDDEN,
                format!("encountered existing file - overwrite prohibited: {}", path),
            ),
            Error::Integrity { msg } => (axum::http::StatusCode::BAD_REQUEST, msg.clone()),
            Error::LockTimeout { key } => (
                axum::http::StatusCode::BAD_REQUEST,
                format!("error - lock timed out on {}", key),
            ),
            Error::Lock { msg } => {
                tracing::error!("lock subsystem error: {}", msg);
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    "error acquiring file lock".to_string(),
                )
            }
            Error::Protocol { msg } => (axum::http::StatusCode::METHOD_NOT_ALLOWED, msg.clone()),
            Error::Unauthorized => (
                axum::http::StatusCode::FORBIDDEN,
                "Invalid or expired token".to_string(),
            ),
            Error::Io { error, path } => {
                // Log full error with path internally, return generic message -
                // never expose repository paths to clients
                tracing::error!("IO error at path {}: {}", path, error);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Error::Kv { msg } => {
                tracing::error!("key-value store error: {}", msg);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            Error::Config { msg } => {
                tracing::error!("Configuration error: {}", msg);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Configuration error".to_string(),
                )
            }
        };

        let body = axum::Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

/// Extension trait for converting I/O errors to custom errors with path context
pub trait ResultIoExt<T> {
    /// Map I/O errors with path context
    fn map_io_err(self, path: &std::path::Path) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            path: path.display().to_string(),
        })
    }
}
