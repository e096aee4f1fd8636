//! Gateway configuration
//!
//! Read once at startup from an optional TOML file, then overlaid with
//! environment variables (a `.env` file is honoured).

use crate::error::{GatewayError, Result};
use obo_auth::ProviderConfig;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "OBO_GATEWAY_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset
pub const DEFAULT_CONFIG_PATH: &str = "obo-gateway.toml";

/// Complete gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Identity provider
    #[serde(default = "default_provider")]
    pub provider: ProviderConfig,

    /// Document search service
    #[serde(default)]
    pub search: SearchConfig,

    /// Directory (user profile) API
    #[serde(default)]
    pub graph: GraphConfig,

    /// Timeout for downstream resource calls
    #[serde(default = "default_downstream_timeout", with = "humantime_serde")]
    pub downstream_timeout: Duration,
}

/// Listener settings
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_host")]
    #[validate(length(min = 1))]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Document search service settings
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SearchConfig {
    /// Service endpoint
    #[serde(default = "default_search_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    /// Index queried by `get_documents`
    #[serde(default = "default_search_index")]
    #[validate(length(min = 1))]
    pub index_name: String,

    /// REST API version
    #[serde(default = "default_search_api_version")]
    pub api_version: String,

    /// Service admin/query key, sent alongside the delegated user token
    #[serde(default, deserialize_with = "deserialize_secret")]
    pub api_key: Option<SecretString>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            index_name: default_search_index(),
            api_version: default_search_api_version(),
            api_key: None,
        }
    }
}

/// Directory API settings
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GraphConfig {
    /// Base URL, without the version segment
    #[serde(default = "default_graph_base_url")]
    #[validate(url)]
    pub base_url: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
        }
    }
}

fn default_provider() -> ProviderConfig {
    ProviderConfig::new("", "")
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_search_endpoint() -> String {
    "https://srch-geba.search.windows.net".to_string()
}

fn default_search_index() -> String {
    "document-permissions-push-idx".to_string()
}

fn default_search_api_version() -> String {
    "2025-05-01-preview".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.microsoft.com".to_string()
}

fn default_downstream_timeout() -> Duration {
    Duration::from_secs(30)
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.is_empty()).map(SecretString::from))
}

/// Source of override values, so loading can be tested without touching the
/// process environment
pub trait EnvSource {
    /// Value of `key`, if set and non-empty
    fn var(&self, key: &str) -> Option<String>;
}

/// The process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl<const N: usize> EnvSource for [(&str, &str); N] {
    fn var(&self, key: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .filter(|v| !v.is_empty())
    }
}

impl GatewayConfig {
    /// Load from the file named by `OBO_GATEWAY_CONFIG` (if present) and the
    /// process environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = ProcessEnv
            .var(CONFIG_PATH_ENV)
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let file = if Path::new(&path).exists() {
            Some(std::fs::read_to_string(&path)?)
        } else {
            None
        };

        Self::from_sources(file.as_deref(), &ProcessEnv)
    }

    /// Build from optional TOML text plus environment overrides, then check
    pub fn from_sources(toml_text: Option<&str>, env: &impl EnvSource) -> Result<Self> {
        let mut config = match toml_text {
            Some(text) => toml::from_str::<GatewayConfig>(text)
                .map_err(|e| GatewayError::ConfigError(format!("Invalid config file: {}", e)))?,
            None => Self::bare(),
        };

        config.apply_env(env)?;
        config.check()?;
        Ok(config)
    }

    fn bare() -> Self {
        Self {
            server: ServerConfig::default(),
            provider: default_provider(),
            search: SearchConfig::default(),
            graph: GraphConfig::default(),
            downstream_timeout: default_downstream_timeout(),
        }
    }

    fn apply_env(&mut self, env: &impl EnvSource) -> Result<()> {
        if let Some(tenant) = env.var("TENANT_ID") {
            self.provider.tenant_id = tenant;
        }
        if let Some(client) = env.var("API_CLIENT_ID") {
            self.provider.client_id = client;
        }
        if let Some(secret) = env.var("CLIENT_SECRET") {
            self.provider.client_secret = Some(SecretString::from(secret));
        }
        if let Some(key) = env.var("AZURE_SEARCH_KEY") {
            self.search.api_key = Some(SecretString::from(key));
        }
        if let Some(host) = env.var("OBO_GATEWAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env.var("OBO_GATEWAY_PORT") {
            self.server.port = port
                .parse()
                .map_err(|_| GatewayError::ConfigError(format!("Invalid OBO_GATEWAY_PORT: {}", port)))?;
        }
        Ok(())
    }

    /// Validate every section
    pub fn check(&self) -> Result<()> {
        self.provider.check()?;

        for (section, outcome) in [
            ("server", self.server.validate()),
            ("search", self.search.validate()),
            ("graph", self.graph.validate()),
        ] {
            outcome.map_err(|e| GatewayError::ConfigError(format!("Invalid [{}] section: {}", section, e)))?;
        }

        Ok(())
    }

    /// Address to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// HTTP client for downstream calls
    pub fn downstream_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.downstream_timeout)
            .build()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const NO_ENV: [(&str, &str); 0] = [];

    const SAMPLE: &str = r#"
        downstream_timeout = "5s"

        [server]
        port = 9000

        [provider]
        tenant_id = "tenant-1"
        client_id = "client123"

        [search]
        endpoint = "https://search.example.net"
    "#;

    #[test]
    fn test_file_with_defaults() {
        let config = GatewayConfig::from_sources(Some(SAMPLE), &NO_ENV).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.downstream_timeout, Duration::from_secs(5));
        assert_eq!(config.search.index_name, "document-permissions-push-idx");
        assert_eq!(config.graph.base_url, "https://graph.microsoft.com");
        assert!(config.provider.client_secret.is_none());
    }

    #[test]
    fn test_environment_overrides_file() {
        let env = [
            ("TENANT_ID", "tenant-2"),
            ("CLIENT_SECRET", "s3cret"),
            ("AZURE_SEARCH_KEY", "search-key"),
            ("OBO_GATEWAY_PORT", "8443"),
        ];
        let config = GatewayConfig::from_sources(Some(SAMPLE), &env).unwrap();

        assert_eq!(config.provider.tenant_id, "tenant-2");
        assert_eq!(config.provider.client_id, "client123");
        assert_eq!(config.server.port, 8443);
        assert_eq!(
            config.provider.client_secret.as_ref().map(|s| s.expose_secret().to_string()),
            Some("s3cret".to_string())
        );
        assert!(config.search.api_key.is_some());
    }

    #[test]
    fn test_environment_only() {
        let env = [("TENANT_ID", "tenant-1"), ("API_CLIENT_ID", "client123")];
        let config = GatewayConfig::from_sources(None, &env).unwrap();

        assert_eq!(config.provider.audience(), "api://client123");
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_missing_identifiers_rejected() {
        assert!(matches!(
            GatewayConfig::from_sources(None, &NO_ENV),
            Err(GatewayError::AuthError(_))
        ));
    }

    #[test]
    fn test_bad_port_rejected() {
        let env = [("OBO_GATEWAY_PORT", "eighty")];
        assert!(matches!(
            GatewayConfig::from_sources(Some(SAMPLE), &env),
            Err(GatewayError::ConfigError(_))
        ));
    }
}
