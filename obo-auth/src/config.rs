//! Identity provider configuration
//!
//! Loaded once at process start by the host and passed by value into each
//! component constructor. Nothing in this crate reads the environment.

use crate::error::{AuthError, Result};
use crate::validation::TokenRequirements;
use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::str::FromStr;
use std::time::Duration;
use validator::Validate;

/// Default authority host (Microsoft Entra ID)
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Default scope an inbound token must carry
pub const DEFAULT_REQUIRED_SCOPE: &str = "execute";

/// Identity provider settings shared by the validator and the exchanger
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Directory (tenant) identifier
    #[serde(default)]
    #[validate(length(min = 1))]
    pub tenant_id: String,

    /// Client identifier of this gateway's app registration
    #[serde(default)]
    #[validate(length(min = 1))]
    pub client_id: String,

    /// Client secret used for the on-behalf-of grant
    ///
    /// When absent, every exchange fails fast without a network call.
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub client_secret: Option<SecretString>,

    /// Authority host, e.g. `https://login.microsoftonline.com`
    #[serde(default = "default_authority_host")]
    #[validate(url)]
    pub authority_host: String,

    /// Expected `iss` override
    #[serde(default)]
    pub issuer: Option<String>,

    /// Expected `aud` override
    #[serde(default)]
    pub audience: Option<String>,

    /// Key discovery endpoint override
    #[serde(default)]
    #[validate(url)]
    pub jwks_uri: Option<String>,

    /// Token endpoint override
    #[serde(default)]
    #[validate(url)]
    pub token_endpoint: Option<String>,

    /// Inbound token must carry at least one of these scopes or roles
    #[serde(default = "default_required_scopes")]
    pub required_scopes: Vec<String>,

    /// The only signing algorithm accepted on inbound tokens
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Clock skew tolerance applied to `exp` and `nbf`, off unless set
    #[serde(default)]
    pub leeway_secs: u64,

    /// Timeout applied to every outbound request
    #[serde(default = "default_http_timeout", with = "humantime_serde")]
    pub http_timeout: Duration,

    /// Signing key cache behaviour
    #[serde(default)]
    pub key_cache: KeyCacheConfig,
}

/// Signing key cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyCacheConfig {
    /// Age after which a cached key set is refreshed
    #[serde(default = "default_key_ttl", with = "humantime_serde")]
    pub ttl: Duration,

    /// Age after which a cached key set is no longer trusted, even if
    /// refreshing keeps failing
    #[serde(default = "default_max_stale", with = "humantime_serde")]
    pub max_stale: Duration,

    /// Minimum spacing between refreshes triggered by unknown key ids
    #[serde(default = "default_min_refresh_interval", with = "humantime_serde")]
    pub min_refresh_interval: Duration,
}

impl Default for KeyCacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_key_ttl(),
            max_stale: default_max_stale(),
            min_refresh_interval: default_min_refresh_interval(),
        }
    }
}

fn default_authority_host() -> String {
    DEFAULT_AUTHORITY_HOST.to_string()
}

fn default_required_scopes() -> Vec<String> {
    vec![DEFAULT_REQUIRED_SCOPE.to_string()]
}

fn default_algorithm() -> String {
    "RS256".to_string()
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_key_ttl() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_max_stale() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl ProviderConfig {
    /// Create a configuration with defaults for everything but the identifiers
    pub fn new(tenant_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: None,
            authority_host: default_authority_host(),
            issuer: None,
            audience: None,
            jwks_uri: None,
            token_endpoint: None,
            required_scopes: default_required_scopes(),
            algorithm: default_algorithm(),
            leeway_secs: 0,
            http_timeout: default_http_timeout(),
            key_cache: KeyCacheConfig::default(),
        }
    }

    /// Set the client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Validate field formats and cross-field constraints
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| AuthError::ConfigError(format!("Invalid provider config: {}", e)))?;

        url::Url::parse(&self.authority_host).map_err(|e| {
            AuthError::ConfigError(format!("Invalid authority host {}: {}", self.authority_host, e))
        })?;

        self.algorithm()?;

        if self.key_cache.max_stale < self.key_cache.ttl {
            return Err(AuthError::ConfigError(
                "key_cache.max_stale must not be shorter than key_cache.ttl".to_string(),
            ));
        }

        Ok(())
    }

    /// Pinned signing algorithm
    pub fn algorithm(&self) -> Result<Algorithm> {
        Algorithm::from_str(&self.algorithm).map_err(|_| {
            AuthError::ConfigError(format!("Unsupported signing algorithm: {}", self.algorithm))
        })
    }

    /// Expected token issuer
    ///
    /// Defaults to the v1 issuer format, which is what the provider stamps
    /// on access tokens for APIs exposed under `api://`.
    pub fn issuer(&self) -> String {
        self.issuer
            .clone()
            .unwrap_or_else(|| format!("https://sts.windows.net/{}/", self.tenant_id))
    }

    /// Expected token audience
    pub fn audience(&self) -> String {
        self.audience
            .clone()
            .unwrap_or_else(|| format!("api://{}", self.client_id))
    }

    /// Key discovery endpoint
    pub fn jwks_uri(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/discovery/v2.0/keys",
                self.authority_host.trim_end_matches('/'),
                self.tenant_id
            )
        })
    }

    /// Token endpoint used for the on-behalf-of grant
    pub fn token_endpoint(&self) -> String {
        self.token_endpoint.clone().unwrap_or_else(|| {
            format!(
                "{}/{}/oauth2/v2.0/token",
                self.authority_host.trim_end_matches('/'),
                self.tenant_id
            )
        })
    }

    /// Requirements every inbound token is checked against
    pub fn requirements(&self) -> TokenRequirements {
        TokenRequirements::new(self.audience(), self.issuer(), self.required_scopes.clone())
    }

    /// HTTP client with the configured timeout
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
            .map_err(AuthError::from)
    }
}
