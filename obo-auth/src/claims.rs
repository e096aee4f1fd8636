//! Token claims
//!
//! Two deliberately unrelated types live here:
//!
//! - [`UnverifiedToken`]: header and claims decoded without any signature
//!   check. Used for structural parsing and diagnostics only. There is no
//!   conversion from it into an [`IdentityContext`].
//! - [`IdentityContext`]: the identity produced by a successful validation.
//!   It carries the original assertion, which the on-behalf-of exchange
//!   needs verbatim.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Audience claim value, which can be a single string or array of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// A single audience string.
    Single(String),
    /// Multiple audience strings.
    Multiple(Vec<String>),
}

impl Audience {
    /// Check if the audience contains a specific value.
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::Single(s) => s == value,
            Audience::Multiple(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Errors from decoding a token without verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InspectError {
    /// Not three dot-separated segments
    #[error("expected 3 token segments, found {0}")]
    Segments(usize),

    /// A segment is not base64url
    #[error("{0} segment is not valid base64url")]
    Encoding(&'static str),

    /// A segment is not the expected JSON object
    #[error("{segment} segment is not valid JSON: {detail}")]
    Json {
        /// Which segment failed
        segment: &'static str,
        /// Parser message
        detail: String,
    },
}

/// JOSE header fields read before verification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnverifiedHeader {
    /// Declared signing algorithm, kept as a raw string so unexpected values
    /// (including `none`) can be reported rather than failing to parse
    #[serde(default)]
    pub alg: Option<String>,

    /// Key identifier
    #[serde(default)]
    pub kid: Option<String>,

    /// Media type
    #[serde(default)]
    pub typ: Option<String>,
}

/// Claims read before verification
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnverifiedClaims {
    /// Issuer
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience
    #[serde(default)]
    pub aud: Option<Audience>,

    /// Subject
    #[serde(default)]
    pub sub: Option<String>,

    /// Object id of the user
    #[serde(default)]
    pub oid: Option<String>,

    /// Tenant id
    #[serde(default)]
    pub tid: Option<String>,

    /// Space-delimited delegated scopes
    #[serde(default)]
    pub scp: Option<String>,

    /// App roles
    #[serde(default)]
    pub roles: Option<Vec<String>>,

    /// Expiry (Unix seconds)
    #[serde(default)]
    pub exp: Option<i64>,

    /// Not-before (Unix seconds)
    #[serde(default)]
    pub nbf: Option<i64>,

    /// Client application id
    #[serde(default)]
    pub appid: Option<String>,

    /// Email, when the provider includes it
    #[serde(default)]
    pub email: Option<String>,
}

/// A token decoded without verification
///
/// Nothing read from this type may be used for an authorization decision.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    header: UnverifiedHeader,
    claims: UnverifiedClaims,
}

impl UnverifiedToken {
    /// Decode header and claims without checking the signature
    pub fn inspect(raw: &str) -> Result<Self, InspectError> {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() != 3 {
            return Err(InspectError::Segments(segments.len()));
        }

        let header = decode_segment::<UnverifiedHeader>(segments[0], "header")?;
        let claims = decode_segment::<UnverifiedClaims>(segments[1], "payload")?;

        Ok(Self { header, claims })
    }

    /// Header fields
    pub fn header(&self) -> &UnverifiedHeader {
        &self.header
    }

    /// Claim fields
    pub fn claims(&self) -> &UnverifiedClaims {
        &self.claims
    }

    /// First required field that is absent, if any
    ///
    /// Required: `alg` and `kid` in the header; `iss`, `aud`, `sub` and `exp`
    /// in the claims.
    pub fn missing_required(&self) -> Option<&'static str> {
        if self.header.alg.is_none() {
            return Some("alg");
        }
        if self.header.kid.is_none() {
            return Some("kid");
        }
        if self.claims.iss.is_none() {
            return Some("iss");
        }
        if self.claims.aud.is_none() {
            return Some("aud");
        }
        if self.claims.sub.is_none() {
            return Some("sub");
        }
        if self.claims.exp.is_none() {
            return Some("exp");
        }
        None
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(
    segment: &str,
    name: &'static str,
) -> Result<T, InspectError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|_| InspectError::Encoding(name))?;

    serde_json::from_slice(&bytes).map_err(|e| InspectError::Json {
        segment: name,
        detail: e.to_string(),
    })
}

/// Claims decoded by the signature-checking decoder
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct VerifiedClaims {
    pub iss: String,
    pub aud: Audience,
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub scp: Option<String>,
    /// RFC 8693 spelling of `scp`, used by some issuers
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub upn: Option<String>,
}

impl VerifiedClaims {
    pub fn scopes(&self) -> Vec<String> {
        self.scp
            .as_deref()
            .or(self.scope.as_deref())
            .unwrap_or("")
            .split_whitespace()
            .map(String::from)
            .collect()
    }
}

/// Identity established by a successful validation
#[derive(Debug, Clone)]
pub struct IdentityContext {
    subject: String,
    object_id: Option<String>,
    tenant_id: Option<String>,
    username: Option<String>,
    issuer: String,
    audience: Audience,
    scopes: Vec<String>,
    roles: Vec<String>,
    expires_at: DateTime<Utc>,
    /// Original bearer string; redacted in `Debug`
    assertion: SecretString,
}

impl IdentityContext {
    pub(crate) fn from_verified(claims: VerifiedClaims, assertion: &str) -> Self {
        let scopes = claims.scopes();
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Self {
            subject: claims.sub,
            object_id: claims.oid,
            tenant_id: claims.tid,
            username: claims.preferred_username.or(claims.upn),
            issuer: claims.iss,
            audience: claims.aud,
            scopes,
            roles: claims.roles,
            expires_at,
            assertion: SecretString::from(assertion.to_string()),
        }
    }

    /// Start building an identity by hand
    ///
    /// Intended for token validator test doubles; production identities come
    /// from [`crate::validation::JwtTokenValidator`].
    pub fn builder(subject: impl Into<String>, assertion: impl Into<String>) -> IdentityContextBuilder {
        IdentityContextBuilder {
            subject: subject.into(),
            assertion: assertion.into(),
            object_id: None,
            tenant_id: None,
            username: None,
            issuer: String::new(),
            audience: Audience::Multiple(vec![]),
            scopes: vec![],
            roles: vec![],
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    /// Subject (`sub`)
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// User object id (`oid`)
    pub fn object_id(&self) -> Option<&str> {
        self.object_id.as_deref()
    }

    /// Tenant id (`tid`)
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    /// Preferred username or UPN
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Verified issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Verified audience
    pub fn audience(&self) -> &Audience {
        &self.audience
    }

    /// Delegated scopes (`scp`, or `scope` when `scp` is absent)
    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    /// App roles (`roles`)
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Expiry of the inbound token
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether any of `wanted` appears among the scopes or roles
    pub fn grants_any(&self, wanted: &[String]) -> bool {
        wanted
            .iter()
            .any(|w| self.scopes.iter().chain(self.roles.iter()).any(|g| g == w))
    }

    /// The original assertion, for the on-behalf-of exchange
    pub fn assertion(&self) -> &SecretString {
        &self.assertion
    }
}

/// Builder for [`IdentityContext`]
pub struct IdentityContextBuilder {
    subject: String,
    assertion: String,
    object_id: Option<String>,
    tenant_id: Option<String>,
    username: Option<String>,
    issuer: String,
    audience: Audience,
    scopes: Vec<String>,
    roles: Vec<String>,
    expires_at: DateTime<Utc>,
}

impl IdentityContextBuilder {
    /// Set the object id
    #[must_use]
    pub fn object_id(mut self, object_id: impl Into<String>) -> Self {
        self.object_id = Some(object_id.into());
        self
    }

    /// Set the tenant id
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Set the username
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the issuer
    #[must_use]
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Set a single audience
    #[must_use]
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Audience::Single(audience.into());
        self
    }

    /// Set delegated scopes
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Set app roles
    #[must_use]
    pub fn roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    /// Set the expiry
    #[must_use]
    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Finish building
    #[must_use]
    pub fn build(self) -> IdentityContext {
        IdentityContext {
            subject: self.subject,
            object_id: self.object_id,
            tenant_id: self.tenant_id,
            username: self.username,
            issuer: self.issuer,
            audience: self.audience,
            scopes: self.scopes,
            roles: self.roles,
            expires_at: self.expires_at,
            assertion: SecretString::from(self.assertion),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn encode_part(value: serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_audience_single_and_multiple() {
        let single = Audience::Single("api://client123".to_string());
        assert!(single.contains("api://client123"));
        assert!(!single.contains("api://other"));

        let multiple = Audience::Multiple(vec!["a".to_string(), "b".to_string()]);
        assert!(multiple.contains("b"));
        assert!(!multiple.contains("c"));
    }

    #[test]
    fn test_inspect_reads_header_and_claims() {
        let raw = format!(
            "{}.{}.sig",
            encode_part(serde_json::json!({"alg": "RS256", "kid": "k1", "typ": "JWT"})),
            encode_part(serde_json::json!({
                "iss": "https://sts.windows.net/t/",
                "aud": ["api://client123", "other"],
                "sub": "user-42",
                "exp": 1,
                "scp": "execute read"
            })),
        );

        let token = UnverifiedToken::inspect(&raw).unwrap();
        assert_eq!(token.header().kid.as_deref(), Some("k1"));
        assert_eq!(token.claims().sub.as_deref(), Some("user-42"));
        assert!(token.claims().aud.as_ref().unwrap().contains("api://client123"));
        assert_eq!(token.missing_required(), None);
    }

    #[test]
    fn test_inspect_rejects_bad_structure() {
        assert_eq!(
            UnverifiedToken::inspect("not-a-jwt").unwrap_err(),
            InspectError::Segments(1)
        );
        assert_eq!(
            UnverifiedToken::inspect("!!!.e30.sig").unwrap_err(),
            InspectError::Encoding("header")
        );
        assert!(matches!(
            UnverifiedToken::inspect(&format!("{}.e30.sig", URL_SAFE_NO_PAD.encode(b"[1,2"))),
            Err(InspectError::Json { segment: "header", .. })
        ));
    }

    #[test]
    fn test_missing_required_fields() {
        let raw = format!(
            "{}.{}.sig",
            encode_part(serde_json::json!({"alg": "RS256"})),
            encode_part(serde_json::json!({"sub": "user-42"})),
        );

        let token = UnverifiedToken::inspect(&raw).unwrap();
        assert_eq!(token.missing_required(), Some("kid"));
    }

    #[test]
    fn test_identity_context_grants_any() {
        let identity = IdentityContext::builder("user-42", "raw-token")
            .scopes(vec!["read".to_string()])
            .roles(vec!["execute".to_string()])
            .build();

        assert!(identity.grants_any(&["execute".to_string()]));
        assert!(identity.grants_any(&["write".to_string(), "read".to_string()]));
        assert!(!identity.grants_any(&["write".to_string()]));
        assert_eq!(identity.assertion().expose_secret(), "raw-token");
    }

    #[test]
    fn test_identity_context_debug_redacts_assertion() {
        let identity = IdentityContext::builder("user-42", "very-secret-bearer").build();
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("very-secret-bearer"));
        assert!(debug.contains("user-42"));
    }
}
