//! Error types for token validation and delegated exchange

/// Result type for setup-level operations
pub type Result<T> = std::result::Result<T, AuthError>;

/// Setup and infrastructure errors
///
/// Per-call outcomes (validation rejections, exchange failures) are not
/// represented here; they have their own result types so they can be
/// recovered locally by the caller.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP client could not be constructed or a request failed
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Discovery document could not be interpreted
    #[error("Key set error: {0}")]
    KeySetError(String),
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::HttpError(err.without_url().to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::KeySetError(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_errors_are_key_set_errors() {
        let err: AuthError = serde_json::from_str::<serde_json::Value>("{\"keys\":")
            .unwrap_err()
            .into();
        assert!(matches!(err, AuthError::KeySetError(_)));
        assert!(err.to_string().starts_with("Key set error: JSON error:"));
    }
}
