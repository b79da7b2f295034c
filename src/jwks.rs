// src/jwks.rs

use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_HTTP_TIMEOUT, DEFAULT_KEY_CACHE_TTL};
use crate::error::NilaAppleError;
use crate::model::JsonWebKeySet;
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// Upper bound on a key-set document.
const MAX_JWKS_SIZE: usize = 512 * 1024;

/// A key set together with the time it was fetched.
#[derive(Debug)]
pub struct CachedKeySet {
    pub key_set: JsonWebKeySet,
    /// Seconds since the Unix epoch, read from the cache's clock.
    pub fetched_at: u64,
}

impl CachedKeySet {
    fn is_fresh(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.fetched_at) < ttl.as_secs()
    }
}

/// Fetches and caches the provider's JSON Web Key Set.
///
/// Entries are keyed by key-set URI, replaced wholesale on refresh and never
/// served once older than the TTL. Concurrent misses for one URI share a
/// single outbound fetch.
#[derive(Clone)]
pub struct KeySetCache {
    // The cache is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Cache<String, Arc<CachedKeySet>>,
}

static SHARED: OnceCell<KeySetCache> = OnceCell::new();

impl KeySetCache {
    /// Creates a cache backed by the system clock.
    pub fn new(ttl: Duration, http_timeout: Duration) -> Result<Self, NilaAppleError> {
        Self::with_clock(ttl, http_timeout, Arc::new(SystemClock))
    }

    /// Creates a cache that ages entries with the given clock.
    pub fn with_clock(ttl: Duration, http_timeout: Duration, clock: Arc<dyn Clock>) -> Result<Self, NilaAppleError> {
        let http_client = reqwest::Client::builder()
            .timeout(http_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| NilaAppleError::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                ttl,
                clock,
                // One entry per issuer; a handful is plenty.
                entries: Cache::new(16),
            }),
        })
    }

    /// The process-wide cache with the default TTL and timeout.
    pub fn shared() -> Result<Self, NilaAppleError> {
        SHARED
            .get_or_try_init(|| Self::new(DEFAULT_KEY_CACHE_TTL, DEFAULT_HTTP_TIMEOUT))
            .cloned()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the key set published at `jwks_uri`.
    ///
    /// A fresh cached set is returned without blocking. Otherwise the set is
    /// fetched and replaces the cached one. A failed fetch is an error even
    /// when an expired set is still held.
    #[instrument(skip(self, jwks_uri), fields(jwks_uri = %jwks_uri), err)]
    pub async fn get_key_set(&self, jwks_uri: &Url) -> Result<Arc<CachedKeySet>, NilaAppleError> {
        let cache_key = jwks_uri.as_str();

        if let Some(entry) = self.inner.entries.get(cache_key).await {
            if self.is_fresh(&entry) {
                debug!("JWKS cache hit");
                return Ok(entry);
            }
            debug!("Cached JWKS is older than {:?}. Refreshing.", self.inner.ttl);
        } else {
            debug!("JWKS cache miss. Fetching from provider.");
        }

        // Callers for the same URI queue here; the first one fetches, the rest
        // see its entry and leave it untouched.
        let outcome = self
            .inner
            .entries
            .entry_by_ref(cache_key)
            .and_try_compute_with(|current| async move {
                if let Some(entry) = current {
                    if self.is_fresh(entry.value()) {
                        return Ok::<_, NilaAppleError>(Op::Nop);
                    }
                }
                let key_set = self.fetch_key_set(jwks_uri).await?;
                let fetched_at = self.inner.clock.now_secs();
                Ok::<_, NilaAppleError>(Op::Put(Arc::new(CachedKeySet { key_set, fetched_at })))
            })
            .await?;

        match outcome {
            CompResult::Inserted(entry) | CompResult::ReplacedWith(entry) | CompResult::Unchanged(entry) => {
                Ok(entry.into_value())
            }
            CompResult::StillNone(_) | CompResult::Removed(_) => {
                Err(NilaAppleError::KeyFetchError("no key set cached after refresh".to_string()))
            }
        }
    }

    fn is_fresh(&self, entry: &CachedKeySet) -> bool {
        entry.is_fresh(self.inner.clock.now_secs(), self.inner.ttl)
    }

    /// Performs the HTTP GET and parses the key-set document.
    async fn fetch_key_set(&self, jwks_uri: &Url) -> Result<JsonWebKeySet, NilaAppleError> {
        let mut response = self
            .inner
            .http_client
            .get(jwks_uri.clone())
            .send()
            .await
            .map_err(NilaAppleError::NetworkError)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NilaAppleError::KeyFetchError(format!("HTTP {}", status)));
        }

        if let Some(length) = response.content_length() {
            if length > MAX_JWKS_SIZE as u64 {
                return Err(too_large(length));
            }
        }

        // Content-Length may be absent or wrong; the cap holds while streaming too.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(NilaAppleError::NetworkError)? {
            if body.len() + chunk.len() > MAX_JWKS_SIZE {
                return Err(too_large((body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }

        let key_set: JsonWebKeySet = serde_json::from_slice(&body)
            .map_err(|e| NilaAppleError::KeyFetchError(format!("invalid key set document: {}", e)))?;
        if key_set.keys.is_empty() {
            return Err(NilaAppleError::KeyFetchError("key set contains no keys".to_string()));
        }

        info!("Successfully fetched {} keys. Caching for {:?}", key_set.keys.len(), self.inner.ttl);
        Ok(key_set)
    }
}

fn too_large(size: u64) -> NilaAppleError {
    NilaAppleError::KeyFetchError(format!("response too large: at least {} bytes (max {})", size, MAX_JWKS_SIZE))
}
