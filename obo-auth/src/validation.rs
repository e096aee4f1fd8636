//! Bearer Token Validation
//!
//! Verifies an inbound token's signature, issuer, audience, validity window
//! and scopes, producing an [`IdentityContext`] or a [`Rejection`].

use crate::claims::{IdentityContext, UnverifiedToken, VerifiedClaims};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::keys::{KeyError, KeyResolver};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a token was not accepted
///
/// Every variant is terminal. The distinction is for diagnostics; callers
/// only ever see "unauthenticated", "unauthorized", or for
/// [`KeysUnavailable`](Rejection::KeysUnavailable) an internal error, since
/// that one says nothing about the token itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Encoding broken or a required header/claim field absent
    #[error("malformed token")]
    Malformed,

    /// No key with the token's key id in a usable key set
    #[error("unknown signing key")]
    UnknownKey,

    /// Key set could not be fetched and no usable cached set exists
    #[error("signing keys unavailable")]
    KeysUnavailable,

    /// Signature did not verify or the algorithm is not the pinned one
    #[error("bad signature")]
    BadSignature,

    /// `iss` does not match
    #[error("issuer mismatch")]
    BadIssuer,

    /// `aud` does not contain the expected audience
    #[error("audience mismatch")]
    BadAudience,

    /// `exp` is in the past
    #[error("token expired")]
    Expired,

    /// `nbf` is in the future
    #[error("token not yet valid")]
    NotYetValid,

    /// None of the required scopes or roles is granted
    #[error("insufficient scope")]
    InsufficientScope,
}

impl Rejection {
    /// Whether the caller is authenticated but lacks permission
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Rejection::InsufficientScope)
    }

    /// Whether the token could not be judged because of a server-side fault
    pub fn is_internal(&self) -> bool {
        matches!(self, Rejection::KeysUnavailable)
    }
}

/// Outcome of validating one token
pub type ValidationResult = std::result::Result<IdentityContext, Rejection>;

/// What a token must satisfy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequirements {
    /// Expected audience
    pub audience: String,
    /// Expected issuer, compared exactly
    pub issuer: String,
    /// At least one must appear in the scope or role claims; empty means no
    /// scope requirement
    pub scopes_any_of: Vec<String>,
}

impl TokenRequirements {
    /// Create requirements
    pub fn new(audience: impl Into<String>, issuer: impl Into<String>, scopes_any_of: Vec<String>) -> Self {
        Self {
            audience: audience.into(),
            issuer: issuer.into(),
            scopes_any_of,
        }
    }
}

/// Validates inbound bearer tokens
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token` against `requirements`
    async fn validate(&self, token: &str, requirements: &TokenRequirements) -> ValidationResult;
}

/// Production validator: JWT signature checked against resolved signing keys
pub struct JwtTokenValidator {
    keys: Arc<dyn KeyResolver>,
    algorithm: Algorithm,
    leeway_secs: u64,
}

impl JwtTokenValidator {
    /// Create a validator pinned to `algorithm`
    pub fn new(keys: Arc<dyn KeyResolver>, algorithm: Algorithm) -> Self {
        Self {
            keys,
            algorithm,
            leeway_secs: 0,
        }
    }

    /// Create a validator from provider configuration
    pub fn from_config(keys: Arc<dyn KeyResolver>, config: &ProviderConfig) -> Result<Self> {
        Ok(Self::new(keys, config.algorithm()?).with_leeway(config.leeway_secs))
    }

    /// Clock skew tolerance for `exp` and `nbf`
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    /// Signature-only validation; claim checks happen afterwards so each
    /// failure maps to its own rejection
    fn signature_validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation
    }

    fn check_claims(&self, claims: &VerifiedClaims, requirements: &TokenRequirements) -> std::result::Result<(), Rejection> {
        if claims.iss != requirements.issuer {
            return Err(Rejection::BadIssuer);
        }

        if !claims.aud.contains(&requirements.audience) {
            return Err(Rejection::BadAudience);
        }

        let now = Utc::now().timestamp();
        let leeway = i64::try_from(self.leeway_secs).unwrap_or(i64::MAX);

        if let Some(nbf) = claims.nbf {
            if now.saturating_add(leeway) < nbf {
                return Err(Rejection::NotYetValid);
            }
        }

        if now.saturating_sub(leeway) > claims.exp {
            return Err(Rejection::Expired);
        }

        if !requirements.scopes_any_of.is_empty() {
            let granted = claims.scopes();
            let has_any = requirements
                .scopes_any_of
                .iter()
                .any(|wanted| granted.contains(wanted) || claims.roles.contains(wanted));

            if !has_any {
                return Err(Rejection::InsufficientScope);
            }
        }

        Ok(())
    }
}

fn signature_rejection(kind: &ErrorKind) -> Rejection {
    match kind {
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => Rejection::Malformed,
        _ => Rejection::BadSignature,
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str, requirements: &TokenRequirements) -> ValidationResult {
        // 1. Structure
        let inspected = UnverifiedToken::inspect(token).map_err(|e| {
            debug!(error = %e, "Token structure rejected");
            Rejection::Malformed
        })?;

        if let Some(field) = inspected.missing_required() {
            debug!(field, "Token missing required field");
            return Err(Rejection::Malformed);
        }

        // Pinned algorithm; anything else, including "none", is a bad signature.
        let declared = inspected.header().alg.as_deref().unwrap_or_default();
        if declared != format!("{:?}", self.algorithm) {
            debug!(alg = declared, "Unexpected signing algorithm");
            return Err(Rejection::BadSignature);
        }

        // 2. Signing key
        let kid = inspected.header().kid.as_deref().unwrap_or_default();
        let key = self.keys.resolve(kid).await.map_err(|e| match e {
            KeyError::NotFound(_) => {
                debug!(kid, "Signing key not found");
                Rejection::UnknownKey
            }
            KeyError::Unavailable(detail) => {
                warn!(kid, detail = %detail, "Signing keys unavailable");
                Rejection::KeysUnavailable
            }
        })?;

        // 3. Signature. Claims used below come only from the verified decode.
        let verified = jsonwebtoken::decode::<VerifiedClaims>(token, &key, &self.signature_validation())
            .map_err(|e| {
                debug!(error = %e, "Token signature rejected");
                signature_rejection(e.kind())
            })?;

        // 4-7. Issuer, audience, validity window, scope
        self.check_claims(&verified.claims, requirements)?;

        // 8. Identity
        Ok(IdentityContext::from_verified(verified.claims, token))
    }
}

/// Test double returning scripted results
///
/// Tokens without a script receive the default result, which starts out as
/// [`Rejection::Malformed`].
#[derive(Default)]
pub struct StaticTokenValidator {
    scripted: HashMap<String, ValidationResult>,
    default: Option<ValidationResult>,
}

impl StaticTokenValidator {
    /// Create an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result for `token`
    pub fn with(mut self, token: impl Into<String>, result: ValidationResult) -> Self {
        self.scripted.insert(token.into(), result);
        self
    }

    /// Result for unscripted tokens
    pub fn with_default(mut self, result: ValidationResult) -> Self {
        self.default = Some(result);
        self
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, token: &str, _requirements: &TokenRequirements) -> ValidationResult {
        self.scripted
            .get(token)
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(Err(Rejection::Malformed))
    }
}
