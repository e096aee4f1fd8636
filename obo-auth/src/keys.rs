//! Signing Key Resolution
//!
//! Fetches the identity provider's JSON Web Key Set and caches the decoding
//! keys by key id. The cache is the only state shared across calls.
//!
//! Refresh rules:
//! - no cached set: fetch inline (all concurrent callers share one fetch)
//! - cached set older than `ttl`: serve the cached key, refresh in background
//!   at most once per `min_refresh_interval`
//! - unknown key id: one forced inline refresh, throttled by
//!   `min_refresh_interval`
//! - refresh failure: the previous set stays usable until `max_stale`

use crate::config::{KeyCacheConfig, ProviderConfig};
use crate::error::AuthError;
use async_trait::async_trait;
use jsonwebtoken::jwk::{JwkSet, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Key resolution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// No key with this id, even after a refresh
    #[error("signing key '{0}' not found")]
    NotFound(String),

    /// Key set could not be fetched and no usable cached set exists
    #[error("signing keys unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a key id to verification key material
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Look up the decoding key for `key_id`
    async fn resolve(&self, key_id: &str) -> Result<Arc<DecodingKey>, KeyError>;
}

/// Turn a JWK set into decoding keys, skipping keys that cannot verify
/// signatures
fn decoding_keys(set: &JwkSet) -> HashMap<String, Arc<DecodingKey>> {
    let mut keys = HashMap::new();

    for jwk in &set.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            debug!("Skipping JWK without kid");
            continue;
        };

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            debug!(kid = %kid, "Skipping encryption key");
            continue;
        }

        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid, Arc::new(key));
            }
            Err(e) => warn!(kid = %kid, error = %e, "Skipping unusable JWK"),
        }
    }

    keys
}

/// Fixed key set, never refreshed
///
/// For tests and for deployments that pin keys out of band.
#[derive(Clone)]
pub struct StaticKeyResolver {
    keys: Arc<HashMap<String, Arc<DecodingKey>>>,
}

impl StaticKeyResolver {
    /// Build from a JWK set
    pub fn from_jwks(set: &JwkSet) -> Self {
        Self {
            keys: Arc::new(decoding_keys(set)),
        }
    }

    /// Number of usable keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no usable key was found
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, key_id: &str) -> Result<Arc<DecodingKey>, KeyError> {
        self.keys
            .get(key_id)
            .cloned()
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }
}

/// A fetched key set
struct CachedKeySet {
    keys: HashMap<String, Arc<DecodingKey>>,
    fetched_at: Instant,
}

impl CachedKeySet {
    fn age(&self) -> std::time::Duration {
        self.fetched_at.elapsed()
    }
}

/// Bookkeeping guarded by the refresh lock
#[derive(Default)]
struct RefreshState {
    last_attempt: Option<Instant>,
    last_error: Option<String>,
}

struct Inner {
    jwks_uri: String,
    http: reqwest::Client,
    settings: KeyCacheConfig,
    cache: RwLock<Option<Arc<CachedKeySet>>>,
    refresh: Mutex<RefreshState>,
    /// Completed fetch attempts, read outside the refresh lock so waiters can
    /// tell whether a fetch finished while they queued
    attempts: AtomicU64,
}

/// JWKS-backed key resolver
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct JwksKeyResolver {
    inner: Arc<Inner>,
}

impl JwksKeyResolver {
    /// Create a resolver for `jwks_uri`
    ///
    /// Nothing is fetched until the first resolution or [`warm_up`](Self::warm_up).
    pub fn new(jwks_uri: impl Into<String>, http: reqwest::Client, settings: KeyCacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jwks_uri: jwks_uri.into(),
                http,
                settings,
                cache: RwLock::new(None),
                refresh: Mutex::new(RefreshState::default()),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Create a resolver from provider configuration
    pub fn from_config(config: &ProviderConfig) -> crate::error::Result<Self> {
        Ok(Self::new(config.jwks_uri(), config.http_client()?, config.key_cache))
    }

    /// Prefetch the key set
    ///
    /// A failure is returned for logging but leaves the resolver usable; the
    /// next resolution retries.
    pub async fn warm_up(&self) -> Result<usize, KeyError> {
        let seen = self.inner.attempts.load(Ordering::Acquire);
        let set = self.refresh(seen, false).await?;
        Ok(set.keys.len())
    }

    async fn snapshot(&self) -> Option<Arc<CachedKeySet>> {
        self.inner.cache.read().await.clone()
    }

    /// Refresh the key set, sharing one fetch among concurrent callers
    ///
    /// `seen` is the attempt counter the caller read before it looked at the
    /// cache. `throttled` applies `min_refresh_interval`; it is set for
    /// refreshes caused by unknown key ids.
    async fn refresh(&self, seen: u64, throttled: bool) -> Result<Arc<CachedKeySet>, KeyError> {
        let mut state = self.inner.refresh.lock().await;

        // A fetch completed while this caller waited for the lock; share it.
        if self.inner.attempts.load(Ordering::Acquire) != seen {
            return match (&state.last_error, self.snapshot().await) {
                (None, Some(set)) => Ok(set),
                (Some(e), _) => Err(KeyError::Unavailable(e.clone())),
                (None, None) => Err(KeyError::Unavailable("no key set fetched".to_string())),
            };
        }

        if throttled {
            if let (Some(last), Some(set)) = (state.last_attempt, self.snapshot().await) {
                if last.elapsed() < self.inner.settings.min_refresh_interval {
                    debug!("Skipping key refresh inside minimum refresh interval");
                    return Ok(set);
                }
            }
        }

        state.last_attempt = Some(Instant::now());
        let outcome = self.fetch().await;

        // The counter is bumped only after the outcome is recorded.
        match outcome {
            Ok(keys) => {
                info!(count = keys.len(), uri = %self.inner.jwks_uri, "Signing keys refreshed");
                let set = Arc::new(CachedKeySet {
                    keys,
                    fetched_at: Instant::now(),
                });
                *self.inner.cache.write().await = Some(set.clone());
                state.last_error = None;
                self.inner.attempts.fetch_add(1, Ordering::AcqRel);
                Ok(set)
            }
            Err(e) => {
                warn!(error = %e, uri = %self.inner.jwks_uri, "Signing key refresh failed");
                let message = e.to_string();
                state.last_error = Some(message.clone());
                self.inner.attempts.fetch_add(1, Ordering::AcqRel);
                Err(KeyError::Unavailable(message))
            }
        }
    }

    async fn fetch(&self) -> crate::error::Result<HashMap<String, Arc<DecodingKey>>> {
        let response = self.inner.http.get(&self.inner.jwks_uri).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::HttpError(format!(
                "discovery endpoint returned {}",
                status
            )));
        }

        let body = response.bytes().await?;
        let set: JwkSet = serde_json::from_slice(&body)?;

        let keys = decoding_keys(&set);
        if keys.is_empty() {
            return Err(AuthError::KeySetError(
                "key set contains no usable signing keys".to_string(),
            ));
        }

        Ok(keys)
    }

    fn refresh_in_background(&self, seen: u64) {
        match self.inner.refresh.try_lock() {
            // Already refreshing
            Err(_) => return,
            Ok(state) => {
                let interval = self.inner.settings.min_refresh_interval;
                if state.last_attempt.is_some_and(|last| last.elapsed() < interval) {
                    return;
                }
            }
        }

        let resolver = self.clone();
        tokio::spawn(async move {
            if let Err(e) = resolver.refresh(seen, true).await {
                debug!(error = %e, "Background key refresh failed; cached keys remain in use");
            }
        });
    }
}

#[async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self, key_id: &str) -> Result<Arc<DecodingKey>, KeyError> {
        let settings = self.inner.settings;

        // Read before the cache so a fetch completing in between is detected.
        let seen = self.inner.attempts.load(Ordering::Acquire);
        let cached = match self.snapshot().await {
            Some(set) => set,
            None => self.refresh(seen, false).await?,
        };

        if let Some(key) = cached.keys.get(key_id) {
            if cached.age() < settings.ttl {
                return Ok(key.clone());
            }
            if cached.age() < settings.max_stale {
                self.refresh_in_background(seen);
                return Ok(key.clone());
            }
            // Past the staleness bound: only a fresh set may answer.
            let fresh = self.refresh(seen, false).await?;
            return fresh
                .keys
                .get(key_id)
                .cloned()
                .ok_or_else(|| KeyError::NotFound(key_id.to_string()));
        }

        debug!(kid = %key_id, "Unknown key id, forcing key refresh");
        match self.refresh(seen, true).await {
            Ok(fresh) => fresh
                .keys
                .get(key_id)
                .cloned()
                .ok_or_else(|| KeyError::NotFound(key_id.to_string())),
            Err(KeyError::Unavailable(e)) if cached.age() < settings.max_stale => {
                debug!(kid = %key_id, error = %e, "Refresh failed, key id still unknown");
                Err(KeyError::NotFound(key_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }
}
