//! Tool Orchestrator
//!
//! Runs one invocation end to end: bearer extraction, validation, one
//! on-behalf-of exchange per declared scope, the downstream call, and
//! normalization into a [`ResultEnvelope`].
//!
//! Steps are strictly sequential and each depends on the previous one
//! succeeding. No downstream call is attempted without a fresh delegated
//! token for every declared scope.

use crate::envelope::{ErrorCategory, ResultEnvelope};
use crate::error::{DownstreamError, OperationError};
use async_trait::async_trait;
use obo_auth::{
    DelegatedToken, DelegationExchanger, IdentityContext, Rejection, TokenRequirements,
    TokenValidator, UnverifiedToken,
};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Placeholder substituted for bearer material found in error details
const REDACTED: &str = "[redacted]";

/// Longest downstream failure detail returned to the caller
const MAX_DETAIL_CHARS: usize = 512;

/// An operation exposed through the gateway
#[async_trait]
pub trait Operation: Send + Sync {
    /// Name callers invoke it by
    fn name(&self) -> &str;

    /// Human-readable summary
    fn description(&self) -> &str;

    /// Downstream scopes; one delegated token is minted per scope
    fn required_scopes(&self) -> Vec<String>;

    /// Reject malformed parameters before any token is exchanged
    fn check_params(&self, _params: &Value) -> Result<(), String> {
        Ok(())
    }

    /// Perform the downstream call
    async fn call(&self, ctx: &DownstreamContext, params: Value) -> Result<Value, OperationError>;
}

/// Listing entry for an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationDescriptor {
    /// Operation name
    pub name: String,
    /// Summary
    pub description: String,
    /// Downstream scopes it delegates to
    pub scopes: Vec<String>,
}

/// What the transport hands the orchestrator for one call
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    bearer: Option<SecretString>,
    request_id: Option<String>,
}

impl CallContext {
    /// No credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Carry a bearer token
    pub fn with_bearer(token: impl Into<String>) -> Self {
        Self {
            bearer: Some(SecretString::from(token.into())),
            request_id: None,
        }
    }

    /// Parse an `Authorization` header value
    ///
    /// Anything other than a non-empty `Bearer` credential leaves the context
    /// anonymous.
    pub fn from_authorization(header: Option<&str>) -> Self {
        let token = header.and_then(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            let token = token.trim();
            (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
        });

        match token {
            Some(token) => Self::with_bearer(token),
            None => Self::anonymous(),
        }
    }

    /// Attach a caller-supplied request id for log correlation
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Whether a bearer token is present
    pub fn has_bearer(&self) -> bool {
        self.bearer.is_some()
    }
}

/// Everything an operation may use for its downstream call
pub struct DownstreamContext {
    identity: IdentityContext,
    tokens: HashMap<String, DelegatedToken>,
    http: reqwest::Client,
}

impl DownstreamContext {
    /// The validated caller
    pub fn identity(&self) -> &IdentityContext {
        &self.identity
    }

    /// Delegated token for `scope`
    pub fn token_for(&self, scope: &str) -> Result<&SecretString, DownstreamError> {
        self.tokens
            .get(scope)
            .map(|t| &t.access_token)
            .ok_or_else(|| DownstreamError::UndeclaredScope(scope.to_string()))
    }

    /// Shared HTTP client for downstream calls
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Replace every bearer value this invocation has seen
    fn scrub(&self, detail: &str) -> String {
        let mut clean = detail.to_string();
        let secrets = self
            .tokens
            .values()
            .map(|t| t.access_token.expose_secret())
            .chain(std::iter::once(self.identity.assertion().expose_secret()));

        for secret in secrets {
            if !secret.is_empty() {
                clean = clean.replace(secret, REDACTED);
            }
        }
        clean
    }
}

/// Binds validation, delegation and operations together
pub struct ToolOrchestrator {
    validator: Arc<dyn TokenValidator>,
    exchanger: Arc<dyn DelegationExchanger>,
    requirements: TokenRequirements,
    http: reqwest::Client,
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

/// Builder for [`ToolOrchestrator`]
pub struct ToolOrchestratorBuilder {
    validator: Arc<dyn TokenValidator>,
    exchanger: Arc<dyn DelegationExchanger>,
    requirements: TokenRequirements,
    http: Option<reqwest::Client>,
    operations: BTreeMap<String, Arc<dyn Operation>>,
}

impl ToolOrchestratorBuilder {
    /// HTTP client handed to operations
    #[must_use]
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Register an operation; a later registration with the same name wins
    #[must_use]
    pub fn operation(mut self, operation: Arc<dyn Operation>) -> Self {
        self.operations.insert(operation.name().to_string(), operation);
        self
    }

    /// Register several operations
    #[must_use]
    pub fn operations(self, operations: impl IntoIterator<Item = Arc<dyn Operation>>) -> Self {
        operations.into_iter().fold(self, |builder, op| builder.operation(op))
    }

    /// Finish
    pub fn build(self) -> ToolOrchestrator {
        ToolOrchestrator {
            validator: self.validator,
            exchanger: self.exchanger,
            requirements: self.requirements,
            http: self.http.unwrap_or_default(),
            operations: self.operations,
        }
    }
}

impl ToolOrchestrator {
    /// Start building an orchestrator
    pub fn builder(
        validator: Arc<dyn TokenValidator>,
        exchanger: Arc<dyn DelegationExchanger>,
        requirements: TokenRequirements,
    ) -> ToolOrchestratorBuilder {
        ToolOrchestratorBuilder {
            validator,
            exchanger,
            requirements,
            http: None,
            operations: BTreeMap::new(),
        }
    }

    /// Registered operations, sorted by name
    pub fn operations(&self) -> Vec<OperationDescriptor> {
        self.operations
            .values()
            .map(|op| OperationDescriptor {
                name: op.name().to_string(),
                description: op.description().to_string(),
                scopes: op.required_scopes(),
            })
            .collect()
    }

    /// Run `name` for the caller described by `call`
    pub async fn invoke(&self, name: &str, call: &CallContext, params: Value) -> ResultEnvelope {
        let invocation_id = Uuid::new_v4();
        let span = info_span!(
            "invoke",
            tool = %name,
            invocation_id = %invocation_id,
            request_id = call.request_id.as_deref().unwrap_or(""),
        );

        async move {
            let envelope = self.run(name, call, params).await;
            match envelope.category() {
                None => info!("Invocation succeeded"),
                Some(category) => info!(outcome = ?category, "Invocation failed"),
            }
            envelope
        }
        .instrument(span)
        .await
    }

    async fn run(&self, name: &str, call: &CallContext, params: Value) -> ResultEnvelope {
        // 1. Bearer
        let Some(bearer) = &call.bearer else {
            debug!("No bearer token");
            return ResultEnvelope::error(ErrorCategory::Unauthenticated);
        };

        // 2. Validation
        let identity = match self
            .validator
            .validate(bearer.expose_secret(), &self.requirements)
            .await
        {
            Ok(identity) => identity,
            Err(rejection) if rejection.is_internal() => {
                warn!(reason = %rejection, "Token could not be validated");
                return ResultEnvelope::error(ErrorCategory::InternalError);
            }
            Err(rejection) => {
                log_rejection(bearer, rejection);
                let category = if rejection.is_forbidden() {
                    ErrorCategory::Unauthorized
                } else {
                    ErrorCategory::Unauthenticated
                };
                return ResultEnvelope::error(category);
            }
        };

        debug!(subject = identity.subject(), "Caller authenticated");

        let Some(operation) = self.operations.get(name) else {
            return ResultEnvelope::error_with_detail(
                ErrorCategory::UnknownTool,
                format!("no tool named '{}'", name),
            );
        };

        if let Err(detail) = operation.check_params(&params) {
            return ResultEnvelope::error_with_detail(ErrorCategory::InvalidParams, detail);
        }

        // 3. Delegation, one independent exchange per distinct scope
        let mut tokens = HashMap::new();
        for scope in operation.required_scopes() {
            if tokens.contains_key(&scope) {
                continue;
            }

            match self.exchanger.exchange(identity.assertion(), &scope).await {
                Ok(token) if token.is_expired() => {
                    warn!(scope = %scope, "Delegated token already expired");
                    return ResultEnvelope::error(ErrorCategory::DelegationFailed);
                }
                Ok(token) => {
                    debug!(scope = %scope, expires_at = %token.expires_at, "Delegated token obtained");
                    tokens.insert(scope, token);
                }
                // 4. Never call downstream without every token
                Err(e) => {
                    warn!(
                        scope = %scope,
                        status = ?e.status(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Delegation failed"
                    );
                    return ResultEnvelope::error(ErrorCategory::DelegationFailed);
                }
            }
        }

        let ctx = DownstreamContext {
            identity,
            tokens,
            http: self.http.clone(),
        };

        // 5. Downstream
        match operation.call(&ctx, params).await {
            Ok(payload) => ResultEnvelope::success(payload),
            Err(OperationError::InvalidParams(detail)) => {
                ResultEnvelope::error_with_detail(ErrorCategory::InvalidParams, ctx.scrub(&detail))
            }
            Err(OperationError::Downstream(e)) if e.is_internal() => {
                warn!(error = %e, "Operation misconfigured");
                ResultEnvelope::error(ErrorCategory::InternalError)
            }
            Err(OperationError::Downstream(e)) => {
                // Scrub the whole text first so a cut cannot split a token.
                let detail = truncate(&ctx.scrub(&e.to_string()));
                warn!(error = %detail, "Downstream call failed");
                ResultEnvelope::error_with_detail(ErrorCategory::DownstreamFailed, detail)
            }
        }
    }
}

fn truncate(detail: &str) -> String {
    let trimmed = detail.trim();
    match trimmed.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Debug-log what a rejected token claimed to be, from unverified fields only
fn log_rejection(bearer: &SecretString, rejection: Rejection) {
    match UnverifiedToken::inspect(bearer.expose_secret()) {
        Ok(token) => debug!(
            reason = %rejection,
            kid = token.header().kid.as_deref().unwrap_or(""),
            issuer = token.claims().iss.as_deref().unwrap_or(""),
            audience = ?token.claims().aud,
            expires = ?token.claims().exp,
            "Token rejected"
        ),
        Err(e) => debug!(reason = %rejection, structure = %e, "Token rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use obo_auth::{ExchangeError, ExchangeResult, StaticTokenValidator};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn issued(value: &str, scope: &str, lifetime_secs: i64) -> DelegatedToken {
        DelegatedToken {
            access_token: SecretString::from(value.to_string()),
            expires_in: lifetime_secs.max(0) as u64,
            expires_at: Utc::now() + chrono::Duration::seconds(lifetime_secs),
            token_type: "Bearer".to_string(),
            scope: scope.to_string(),
        }
    }

    /// Exchanger returning a scripted result per scope and counting calls
    struct ScriptedExchanger {
        results: HashMap<String, ExchangeResult>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedExchanger {
        fn new(results: Vec<(&str, ExchangeResult)>) -> Self {
            Self {
                results: results.into_iter().map(|(s, r)| (s.to_string(), r)).collect(),
                calls: Mutex::new(vec![]),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DelegationExchanger for ScriptedExchanger {
        async fn exchange(&self, _assertion: &SecretString, scope: &str) -> ExchangeResult {
            self.calls.lock().unwrap().push(scope.to_string());
            self.results
                .get(scope)
                .cloned()
                .unwrap_or(Err(ExchangeError::Unavailable))
        }
    }

    /// Operation that echoes the caller, or fails with its token at the end
    /// of `padding` filler characters
    struct Recorder {
        scopes: Vec<String>,
        failure_padding: Option<usize>,
        calls: AtomicUsize,
    }

    impl Recorder {
        fn new(scopes: &[&str]) -> Self {
            Self {
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                failure_padding: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Operation for Recorder {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Test operation"
        }

        fn required_scopes(&self) -> Vec<String> {
            self.scopes.clone()
        }

        fn check_params(&self, params: &Value) -> Result<(), String> {
            match params {
                Value::Null | Value::Object(_) => Ok(()),
                _ => Err("expected an object".to_string()),
            }
        }

        async fn call(&self, ctx: &DownstreamContext, _params: Value) -> Result<Value, OperationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let token = ctx.token_for(&self.scopes[0])?.expose_secret().to_string();
            if let Some(padding) = self.failure_padding {
                return Err(DownstreamError::Status {
                    status: 401,
                    detail: format!("{}token {} rejected", "x".repeat(padding), token),
                }
                .into());
            }
            Ok(json!({ "subject": ctx.identity().subject() }))
        }
    }

    fn identity() -> IdentityContext {
        IdentityContext::builder("user-42", "inbound-token")
            .scopes(vec!["execute".to_string()])
            .build()
    }

    fn requirements() -> TokenRequirements {
        TokenRequirements::new("api://client123", "https://issuer/", vec!["execute".to_string()])
    }

    fn orchestrator(exchanger: Arc<ScriptedExchanger>, recorder: Arc<Recorder>) -> ToolOrchestrator {
        let validator = StaticTokenValidator::new()
            .with("inbound-token", Ok(identity()))
            .with("no-scope", Err(Rejection::InsufficientScope))
            .with("keys-down", Err(Rejection::KeysUnavailable))
            .with_default(Err(Rejection::BadSignature));

        ToolOrchestrator::builder(Arc::new(validator), exchanger, requirements())
            .operation(recorder)
            .build()
    }

    #[test]
    fn test_authorization_header_parsing() {
        assert!(CallContext::from_authorization(Some("Bearer abc")).has_bearer());
        assert!(CallContext::from_authorization(Some("bearer abc")).has_bearer());
        assert!(!CallContext::from_authorization(Some("Basic abc")).has_bearer());
        assert!(!CallContext::from_authorization(Some("Bearer ")).has_bearer());
        assert!(!CallContext::from_authorization(None).has_bearer());
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthenticated() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let recorder = Arc::new(Recorder::new(&["scope-a"]));
        let envelope = orchestrator(exchanger.clone(), recorder.clone())
            .invoke("echo", &CallContext::anonymous(), Value::Null)
            .await;

        assert_eq!(envelope, ResultEnvelope::error(ErrorCategory::Unauthenticated));
        assert!(exchanger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rejections_map_to_categories() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let orchestrator = orchestrator(exchanger.clone(), Arc::new(Recorder::new(&["scope-a"])));

        let forged = orchestrator
            .invoke("echo", &CallContext::with_bearer("forged"), Value::Null)
            .await;
        assert_eq!(forged, ResultEnvelope::error(ErrorCategory::Unauthenticated));

        let no_scope = orchestrator
            .invoke("echo", &CallContext::with_bearer("no-scope"), Value::Null)
            .await;
        assert_eq!(no_scope, ResultEnvelope::error(ErrorCategory::Unauthorized));
        assert!(exchanger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let envelope = orchestrator(exchanger, Arc::new(Recorder::new(&["scope-a"])))
            .invoke("missing", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;
        assert_eq!(envelope.category(), Some(ErrorCategory::UnknownTool));
    }

    #[tokio::test]
    async fn test_invalid_params_skip_exchange() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let envelope = orchestrator(exchanger.clone(), Arc::new(Recorder::new(&["scope-a"])))
            .invoke("echo", &CallContext::with_bearer("inbound-token"), json!([1, 2]))
            .await;
        assert_eq!(envelope.category(), Some(ErrorCategory::InvalidParams));
        assert!(exchanger.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delegation_failure_skips_downstream() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![(
            "scope-a",
            Err(ExchangeError::Rejected {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.to_string(),
            }),
        )]));
        let recorder = Arc::new(Recorder::new(&["scope-a"]));
        let envelope = orchestrator(exchanger, recorder.clone())
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"error": "delegation_failed"})
        );
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_delegated_token_skips_downstream() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![(
            "scope-a",
            Ok(issued("stale", "scope-a", -5)),
        )]));
        let recorder = Arc::new(Recorder::new(&["scope-a"]));
        let envelope = orchestrator(exchanger, recorder.clone())
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        assert_eq!(envelope, ResultEnvelope::error(ErrorCategory::DelegationFailed));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_each_scope_exchanged_independently() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![
            ("scope-a", Ok(issued("token-a", "scope-a", 3600))),
            ("scope-b", Ok(issued("token-b", "scope-b", 3600))),
        ]));
        let recorder = Arc::new(Recorder::new(&["scope-a", "scope-b", "scope-a"]));
        let envelope = orchestrator(exchanger.clone(), recorder)
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        assert_eq!(envelope, ResultEnvelope::success(json!({"subject": "user-42"})));
        assert_eq!(exchanger.calls(), vec!["scope-a".to_string(), "scope-b".to_string()]);
    }

    #[tokio::test]
    async fn test_second_scope_failure_aborts() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![(
            "scope-a",
            Ok(issued("token-a", "scope-a", 3600)),
        )]));
        let recorder = Arc::new(Recorder::new(&["scope-a", "scope-b"]));
        let envelope = orchestrator(exchanger, recorder.clone())
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        assert_eq!(envelope, ResultEnvelope::error(ErrorCategory::DelegationFailed));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_downstream_failure_scrubs_token() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![(
            "scope-a",
            Ok(issued("super-secret-downstream", "scope-a", 3600)),
        )]));
        let recorder = Arc::new(Recorder {
            failure_padding: Some(0),
            ..Recorder::new(&["scope-a"])
        });
        let envelope = orchestrator(exchanger, recorder)
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        assert_eq!(envelope.category(), Some(ErrorCategory::DownstreamFailed));
        let body = serde_json::to_string(&envelope).unwrap();
        assert!(!body.contains("super-secret-downstream"));
        assert!(body.contains(REDACTED));
    }

    #[tokio::test]
    async fn test_long_failure_detail_never_keeps_token_fragment() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![(
            "scope-a",
            Ok(issued("super-secret-downstream", "scope-a", 3600)),
        )]));
        let recorder = Arc::new(Recorder {
            // The cut at MAX_DETAIL_CHARS falls ten characters into the token
            failure_padding: Some(MAX_DETAIL_CHARS - "downstream returned 401: token ".len() - 10),
            ..Recorder::new(&["scope-a"])
        });
        let envelope = orchestrator(exchanger, recorder)
            .invoke("echo", &CallContext::with_bearer("inbound-token"), Value::Null)
            .await;

        let ResultEnvelope::Error {
            error: ErrorCategory::DownstreamFailed,
            detail: Some(detail),
        } = &envelope
        else {
            panic!("unexpected envelope: {:?}", envelope);
        };
        assert!(!detail.contains("super-sec"));
        assert!(detail.ends_with("..."));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("  short  "), "short");

        let long = "x".repeat(MAX_DETAIL_CHARS + 10);
        let cut = truncate(&long);
        assert_eq!(cut.len(), MAX_DETAIL_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[tokio::test]
    async fn test_key_outage_is_internal_error() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let envelope = orchestrator(exchanger.clone(), Arc::new(Recorder::new(&["scope-a"])))
            .invoke("echo", &CallContext::with_bearer("keys-down"), Value::Null)
            .await;

        assert_eq!(envelope, ResultEnvelope::error(ErrorCategory::InternalError));
        assert_eq!(envelope.status_code(), 500);
        assert!(exchanger.calls().is_empty());
    }

    #[test]
    fn test_listing() {
        let exchanger = Arc::new(ScriptedExchanger::new(vec![]));
        let listing = orchestrator(exchanger, Arc::new(Recorder::new(&["scope-a"]))).operations();

        assert_eq!(
            listing,
            vec![OperationDescriptor {
                name: "echo".to_string(),
                description: "Test operation".to_string(),
                scopes: vec!["scope-a".to_string()],
            }]
        );
    }
}
