//! Read-through fetcher: serve from the freshness cache, or fetch and store.
//!
//! ```text
//! lookup(key) ──fresh──────────────────────────────▶ Fetched { Hit }
//!      │
//!      └─miss/stale─▶ GET url ─▶ status 200? ─▶ read body ─▶ store ─▶ Fetched { Miss }
//!                        │            │              │
//!                 UpstreamUnavailable UpstreamError  UpstreamReadFailure
//! ```
//!
//! There is no single-flight: two tasks that miss on the same key at the same
//! time both go upstream and both store, and the later store wins. A failed
//! refresh never falls back to the stale entry.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cache::FreshnessCache;
use crate::error::GatewayError;
use crate::transport::{Transport, UpstreamResponse};

/// How long a fetched body is served before the next request goes upstream.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Where a payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    /// The `X-Cache` header value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully served payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub payload: Bytes,
    pub source: CacheStatus,
}

/// Cache-first fetcher over a [`Transport`].
///
/// Holds a shared handle to the process-wide [`FreshnessCache`]; it knows
/// nothing about inbound HTTP.
pub struct ReadThroughFetcher<T> {
    cache: Arc<FreshnessCache>,
    transport: T,
}

impl<T: Transport> ReadThroughFetcher<T> {
    pub fn new(cache: Arc<FreshnessCache>, transport: T) -> Self {
        Self { cache, transport }
    }

    pub fn cache(&self) -> &Arc<FreshnessCache> {
        &self.cache
    }

    /// Returns the payload for `key`, going to `upstream_url` when the cached
    /// copy is missing or stale.
    ///
    /// `upstream_url` must already be composed from a validated key; it is
    /// used as-is.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::UpstreamUnavailable`] if no response was received.
    /// - [`GatewayError::UpstreamError`] if the status was not 200.
    /// - [`GatewayError::UpstreamReadFailure`] if the body could not be read.
    ///
    /// On any error the cache is left untouched.
    pub async fn get(&self, key: &str, upstream_url: &str) -> Result<Fetched, GatewayError> {
        if let Some(entry) = self.cache.lookup(key) {
            if entry.is_fresh_at(Instant::now()) {
                debug!(key, "cache hit");
                return Ok(Fetched {
                    payload: entry.payload().clone(),
                    source: CacheStatus::Hit,
                });
            }
            debug!(key, "cache entry stale, refreshing");
        } else {
            debug!(key, "cache miss");
        }

        let payload = self.fetch(upstream_url).await.inspect_err(|e| {
            warn!(key, url = upstream_url, error = %e, "upstream fetch failed");
        })?;

        self.cache.store(key, payload.clone(), CACHE_TTL);
        Ok(Fetched {
            payload,
            source: CacheStatus::Miss,
        })
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, GatewayError> {
        let response = self
            .transport
            .get(url)
            .await
            .map_err(GatewayError::UpstreamUnavailable)?;

        let status = response.status();
        if status != 200 {
            return Err(GatewayError::UpstreamError { status });
        }

        response
            .into_body()
            .await
            .map_err(GatewayError::UpstreamReadFailure)
    }
}
