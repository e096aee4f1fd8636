//! On-Behalf-Of Delegation
//!
//! Exchanges a validated inbound assertion for a token representing the same
//! user against a different resource, using the `jwt-bearer` grant with
//! `requested_token_use=on_behalf_of`.
//!
//! The exchanged token is only ever held as a [`SecretString`]. Failures carry
//! the provider's status and body for operators; callers are expected to
//! collapse them into a generic result before anything reaches the end user.

use crate::config::ProviderConfig;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use tracing::{debug, warn};

/// Grant type for the on-behalf-of flow
pub const OBO_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// A token minted for a downstream resource
#[derive(Debug, Clone)]
pub struct DelegatedToken {
    /// Bearer value for the downstream call
    pub access_token: SecretString,

    /// Lifetime reported by the provider in seconds, or
    /// [`DEFAULT_TOKEN_LIFETIME_SECS`] when it reported none
    pub expires_in: u64,

    /// Absolute expiry, computed when the response was received
    pub expires_at: DateTime<Utc>,

    /// Token type reported by the provider, usually `Bearer`
    pub token_type: String,

    /// The scope that was requested
    pub scope: String,
}

impl DelegatedToken {
    /// Whether the token has passed its expiry
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Delegation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    /// Client credential not configured; no request was made
    #[error("delegation unavailable: client credential not configured")]
    Unavailable,

    /// Provider answered with a non-success status
    #[error("delegation rejected with status {status}")]
    Rejected {
        /// HTTP status
        status: u16,
        /// Response body, verbatim
        body: String,
    },

    /// Request did not complete (timeout, DNS, connection reset)
    #[error("delegation network fault: {0}")]
    NetworkFault(String),

    /// Success status with a body that is not a token response
    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

impl ExchangeError {
    /// HTTP status reported by the provider, if one was received
    pub fn status(&self) -> Option<u16> {
        match self {
            ExchangeError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether repeating the exchange could succeed
    ///
    /// Advisory only. Nothing in this crate retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExchangeError::NetworkFault(_))
    }
}

/// Outcome of one exchange
pub type ExchangeResult = std::result::Result<DelegatedToken, ExchangeError>;

/// Mints downstream tokens on behalf of the calling user
#[async_trait]
pub trait DelegationExchanger: Send + Sync {
    /// Exchange `assertion` for a token scoped to `target_scope`
    async fn exchange(&self, assertion: &SecretString, target_scope: &str) -> ExchangeResult;
}

/// Lifetime assumed when a successful response omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in", deserialize_with = "number_or_string")]
    expires_in: u64,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_expires_in() -> u64 {
    DEFAULT_TOKEN_LIFETIME_SECS
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Error fields the provider returns on a rejected grant
#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_codes: Vec<i64>,
    #[serde(default)]
    correlation_id: Option<String>,
}

/// Token endpoint client for the on-behalf-of grant
#[derive(Clone)]
pub struct OboExchanger {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<SecretString>,
}

impl OboExchanger {
    /// Create an exchanger
    pub fn new(
        http: reqwest::Client,
        token_endpoint: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Option<SecretString>,
    ) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret,
        }
    }

    /// Create an exchanger from provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(
            config.http_client()?,
            config.token_endpoint(),
            config.client_id.clone(),
            config.client_secret.clone(),
        ))
    }

    /// Token endpoint in use
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }
}

#[async_trait]
impl DelegationExchanger for OboExchanger {
    async fn exchange(&self, assertion: &SecretString, target_scope: &str) -> ExchangeResult {
        let Some(secret) = &self.client_secret else {
            warn!(scope = target_scope, "Client secret not configured, cannot delegate");
            return Err(ExchangeError::Unavailable);
        };

        debug!(scope = target_scope, "Requesting on-behalf-of token");

        let form = [
            ("grant_type", OBO_GRANT_TYPE),
            ("client_id", self.client_id.as_str()),
            ("client_secret", secret.expose_secret()),
            ("assertion", assertion.expose_secret()),
            ("scope", target_scope),
            ("requested_token_use", "on_behalf_of"),
        ];

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                warn!(scope = target_scope, error = %e, "Token endpoint unreachable");
                ExchangeError::NetworkFault(e.without_url().to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            warn!(scope = target_scope, error = %e, "Token response interrupted");
            ExchangeError::NetworkFault(e.without_url().to_string())
        })?;

        if !status.is_success() {
            let parsed: ProviderErrorBody = serde_json::from_str(&body).unwrap_or_default();
            warn!(
                scope = target_scope,
                status = status.as_u16(),
                error = parsed.error.as_deref().unwrap_or("unknown"),
                error_description = parsed.error_description.as_deref().unwrap_or(""),
                error_codes = ?parsed.error_codes,
                correlation_id = parsed.correlation_id.as_deref().unwrap_or(""),
                "On-behalf-of exchange rejected"
            );
            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            warn!(scope = target_scope, error = %e, "Token response not understood");
            ExchangeError::MalformedResponse(e.to_string())
        })?;

        if token.access_token.is_empty() {
            return Err(ExchangeError::MalformedResponse("empty access_token".to_string()));
        }

        let lifetime = i64::try_from(token.expires_in).unwrap_or(i64::MAX);
        let expires_at = ChronoDuration::try_seconds(lifetime)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        debug!(scope = target_scope, expires_in = token.expires_in, "On-behalf-of token issued");

        Ok(DelegatedToken {
            access_token: SecretString::from(token.access_token),
            expires_in: token.expires_in,
            expires_at,
            token_type: token.token_type,
            scope: target_scope.to_string(),
        })
    }
}
