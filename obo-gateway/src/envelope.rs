//! Result envelope
//!
//! The only shape an invocation returns. Successes carry the operation's
//! payload untouched; failures carry a stable category and, for a few
//! categories, a short detail string.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Failure category visible to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Missing or invalid bearer token
    Unauthenticated,
    /// Valid token without the required scope
    Unauthorized,
    /// Downstream token could not be obtained
    DelegationFailed,
    /// Downstream call failed
    DownstreamFailed,
    /// No operation with that name
    UnknownTool,
    /// Parameters rejected
    InvalidParams,
    /// Unexpected fault inside the gateway
    InternalError,
}

impl ErrorCategory {
    /// HTTP status for this category
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorCategory::Unauthenticated => 401,
            ErrorCategory::Unauthorized => 403,
            ErrorCategory::DelegationFailed => 502,
            ErrorCategory::DownstreamFailed => 502,
            ErrorCategory::UnknownTool => 404,
            ErrorCategory::InvalidParams => 400,
            ErrorCategory::InternalError => 500,
        }
    }

    /// Whether a detail string may accompany this category
    ///
    /// Validation and delegation failures never carry detail.
    pub fn allows_detail(&self) -> bool {
        matches!(
            self,
            ErrorCategory::DownstreamFailed | ErrorCategory::InvalidParams | ErrorCategory::UnknownTool
        )
    }
}

/// Normalized outcome of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
    /// Failure
    Error {
        /// Category
        error: ErrorCategory,
        /// Optional detail; never bearer material
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Operation payload
    Success(Value),
}

impl ResultEnvelope {
    /// Successful result
    pub fn success(payload: Value) -> Self {
        ResultEnvelope::Success(payload)
    }

    /// Failure without detail
    pub fn error(category: ErrorCategory) -> Self {
        ResultEnvelope::Error {
            error: category,
            detail: None,
        }
    }

    /// Failure with detail, dropped for categories that must not carry any
    pub fn error_with_detail(category: ErrorCategory, detail: impl Into<String>) -> Self {
        ResultEnvelope::Error {
            error: category,
            detail: category.allows_detail().then(|| detail.into()),
        }
    }

    /// Failure category, if this is an error
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ResultEnvelope::Error { error, .. } => Some(*error),
            ResultEnvelope::Success(_) => None,
        }
    }

    /// Whether the invocation succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, ResultEnvelope::Success(_))
    }

    /// HTTP status for this envelope
    pub fn status_code(&self) -> u16 {
        self.category().map(|c| c.status_code()).unwrap_or(200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_delegation_failure_serializes_bare() {
        let envelope = ResultEnvelope::error(ErrorCategory::DelegationFailed);
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": "delegation_failed"})
        );
    }

    #[test]
    fn test_detail_dropped_where_not_allowed() {
        let envelope = ResultEnvelope::error_with_detail(ErrorCategory::Unauthenticated, "bad signature");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": "unauthenticated"})
        );

        let envelope = ResultEnvelope::error_with_detail(ErrorCategory::DownstreamFailed, "returned 500");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": "downstream_failed", "detail": "returned 500"})
        );
    }

    #[test]
    fn test_success_payload_untouched() {
        let payload = json!({"documents": [{"name": "a"}]});
        let envelope = ResultEnvelope::success(payload.clone());
        assert_eq!(serde_json::to_value(&envelope).unwrap(), payload);
        assert_eq!(envelope.status_code(), 200);
        assert!(envelope.is_success());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(ResultEnvelope::error(ErrorCategory::Unauthenticated).status_code(), 401);
        assert_eq!(ResultEnvelope::error(ErrorCategory::Unauthorized).status_code(), 403);
        assert_eq!(ResultEnvelope::error(ErrorCategory::UnknownTool).status_code(), 404);
        assert_eq!(ResultEnvelope::error(ErrorCategory::DelegationFailed).status_code(), 502);
    }
}
