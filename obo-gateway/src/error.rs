//! Error types for the OBO gateway

use thiserror::Error;

/// Result type for gateway setup
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Startup and configuration errors
///
/// Per-invocation failures never surface as this type; they become a
/// [`ResultEnvelope`](crate::envelope::ResultEnvelope).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Configuration file or environment is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Identity provider setup failed
    #[error("Auth setup error: {0}")]
    AuthError(#[from] obo_auth::AuthError),

    /// HTTP client could not be constructed
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// I/O error (config file, listener)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Failure of a downstream resource call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownstreamError {
    /// Downstream answered with a non-success status
    #[error("downstream returned {status}: {detail}")]
    Status {
        /// HTTP status
        status: u16,
        /// Response body
        detail: String,
    },

    /// Request did not complete
    #[error("downstream request failed: {0}")]
    Transport(String),

    /// Response body did not have the expected shape
    #[error("downstream response not understood: {0}")]
    Decode(String),

    /// An operation asked for a token it did not declare
    #[error("no delegated token for scope {0}")]
    UndeclaredScope(String),
}

impl DownstreamError {
    /// Whether this reflects a bug in the operation rather than the
    /// downstream service
    pub fn is_internal(&self) -> bool {
        matches!(self, DownstreamError::UndeclaredScope(_))
    }
}

impl From<reqwest::Error> for DownstreamError {
    fn from(err: reqwest::Error) -> Self {
        // URLs can carry query parameters; keep them out of envelopes
        DownstreamError::Transport(err.without_url().to_string())
    }
}

/// Failure returned by an operation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    /// Parameters do not match the operation's input shape
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The downstream call failed
    #[error(transparent)]
    Downstream(#[from] DownstreamError),
}
