//! Error types for gate-relay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use gate_types::KeyError;

/// Main error type for gateway operations.
///
/// The first five variants are the authorization taxonomy exposed to
/// callers; the rest wrap infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed key or missing required field.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No trust source granted access.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but lacking the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Nothing to consult for a decision that has no fallback.
    #[error("not found: {0}")]
    NotFound(String),

    /// The only viable trust source is disabled or unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Bearer token could not be signed.
    #[error("token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<KeyError> for GatewayError {
    fn from(err: KeyError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}

impl GatewayError {
    /// HTTP status for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) | Self::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

/// Graph storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Node body could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store did not acknowledge within the allowed window.
    #[error("{operation} not acknowledged within {millis}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// The window in milliseconds.
        millis: u128,
    },

    /// Node not found.
    #[error("node not found: {soul}")]
    NotFound {
        /// The soul that was not found.
        soul: String,
    },
}

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
