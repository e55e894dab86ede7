//! Error types for 0k-Gate shared types.

use thiserror::Error;

/// Errors raised while decoding or building shared types.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A public key could not be normalized
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Invalid token identifier
    #[error("invalid token id: {0}")]
    InvalidTokenId(String),
}

/// Public-key normalization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Nothing left after stripping `@` and the certificate suffix
    #[error("public key is empty")]
    Empty,

    /// The key proper is not valid base64url
    #[error("public key is not valid base64url: {0}")]
    Encoding(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = TypesError::InvalidTokenId("zz".into());
        assert_eq!(err.to_string(), "invalid token id: zz");
        assert_eq!(KeyError::Empty.to_string(), "public key is empty");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TypesError>();
    }
}
