//! OBO Auth
//!
//! Inbound bearer token validation and On-Behalf-Of delegation against an
//! OAuth 2.0 / OpenID Connect identity provider.
//!
//! # Components
//!
//! - [`keys`]: signing key discovery and caching
//! - [`validation`]: signature, issuer, audience, lifetime and scope checks
//! - [`exchange`]: the on-behalf-of token exchange
//! - [`claims`]: identity produced by validation, plus unverified inspection
//!   for diagnostics
//!
//! # Example
//!
//! ```no_run
//! use obo_auth::{JwksKeyResolver, JwtTokenValidator, OboExchanger, ProviderConfig, TokenValidator};
//! use std::sync::Arc;
//!
//! # async fn run(bearer: &str) -> obo_auth::Result<()> {
//! let config = ProviderConfig::new("tenant-id", "client-id").with_client_secret("secret");
//! let keys = Arc::new(JwksKeyResolver::from_config(&config)?);
//! let validator = JwtTokenValidator::from_config(keys, &config)?;
//! let exchanger = OboExchanger::from_config(&config)?;
//!
//! if let Ok(identity) = validator.validate(bearer, &config.requirements()).await {
//!     use obo_auth::DelegationExchanger;
//!     let _token = exchanger
//!         .exchange(identity.assertion(), "https://graph.microsoft.com/.default")
//!         .await;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod claims;
pub mod config;
pub mod error;
pub mod exchange;
pub mod keys;
pub mod validation;

pub use claims::{Audience, IdentityContext, UnverifiedToken};
pub use config::{KeyCacheConfig, ProviderConfig};
pub use error::{AuthError, Result};
pub use exchange::{
    DelegatedToken, DelegationExchanger, ExchangeError, ExchangeResult, OboExchanger,
    DEFAULT_TOKEN_LIFETIME_SECS,
};
pub use keys::{JwksKeyResolver, KeyError, KeyResolver, StaticKeyResolver};
pub use validation::{
    JwtTokenValidator, Rejection, StaticTokenValidator, TokenRequirements, TokenValidator,
    ValidationResult,
};
