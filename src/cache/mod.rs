//! Freshness cache: the most recent successful upstream body per resource key.
//!
//! The map sits behind a single [`RwLock`]. Lookups take the shared lock,
//! stores take the exclusive lock, and neither holds it for longer than one
//! map operation; network I/O never happens under the lock.
//!
//! Entries are never removed. A stale entry stays in the map until the next
//! successful fetch for its key overwrites it, so memory grows with the number
//! of distinct keys ever requested.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// One cached upstream response.
///
/// Built in full before it is inserted and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    payload: Bytes,
    expires_at: Instant,
}

impl CacheEntry {
    /// The upstream body exactly as received.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    /// `true` while `now` is strictly before the expiry instant.
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Process-wide map from resource key to [`CacheEntry`].
///
/// Constructed once at startup and shared by reference (`Arc`) with every
/// request task.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use bytes::Bytes;
/// use calgate::cache::FreshnessCache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = FreshnessCache::new();
/// cache.store("https://origin/genres", Bytes::from_static(b"[]"), Duration::from_secs(60));
///
/// let entry = cache.lookup("https://origin/genres").unwrap();
/// assert_eq!(entry.payload().as_ref(), b"[]");
/// assert!(entry.is_fresh_at(tokio::time::Instant::now()));
/// # }
/// ```
#[derive(Debug, Default)]
pub struct FreshnessCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl FreshnessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the entry for `key`, fresh or not.
    ///
    /// Staleness is the caller's call. The copy shares the payload buffer, so
    /// this is cheap regardless of body size.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        // A panicking writer cannot leave a half-built entry behind (inserts
        // are a single `HashMap::insert`), so a poisoned lock is still sound.
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    /// Inserts or replaces the entry for `key`, expiring `ttl` from now.
    pub fn store(&self, key: &str, payload: Bytes, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_owned(), entry);
    }

    /// Number of keys ever stored, stale ones included.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn fresh_before_ttl_elapses() {
        let cache = FreshnessCache::new();
        cache.store("k", Bytes::from_static(b"{\"events\":[]}"), TTL);

        tokio::time::advance(TTL - Duration::from_millis(1)).await;

        let entry = cache.lookup("k").unwrap();
        assert_eq!(entry.payload().as_ref(), b"{\"events\":[]}");
        assert!(entry.is_fresh_at(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_at_and_after_ttl_but_still_returned() {
        let cache = FreshnessCache::new();
        cache.store("k", Bytes::from_static(b"old"), TTL);

        tokio::time::advance(TTL).await;
        let entry = cache.lookup("k").unwrap();
        assert!(!entry.is_fresh_at(Instant::now()));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.lookup("k").unwrap().is_fresh_at(Instant::now()));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_replaces_wholesale() {
        let cache = FreshnessCache::new();
        cache.store("k", Bytes::from_static(b"A"), Duration::from_secs(10));
        let first_expiry = cache.lookup("k").unwrap().expires_at();

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.store("k", Bytes::from_static(b"B"), Duration::from_secs(60));

        let entry = cache.lookup("k").unwrap();
        assert_eq!(entry.payload().as_ref(), b"B");
        assert_eq!(entry.expires_at(), Instant::now() + Duration::from_secs(60));
        assert!(entry.expires_at() > first_expiry);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn missing_key() {
        let cache = FreshnessCache::new();
        assert!(cache.lookup("nope").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn lookups_have_no_side_effects() {
        let cache = FreshnessCache::new();
        cache.store("k", Bytes::from_static(b"v"), TTL);
        let first = cache.lookup("k");
        for _ in 0..10 {
            assert_eq!(cache.lookup("k"), first);
        }
        assert_eq!(cache.lookup("other"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_readers_and_writers() {
        use std::sync::Arc;

        let cache = Arc::new(FreshnessCache::new());
        let mut tasks = Vec::new();
        for i in 0..16u8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                let key = format!("key-{}", i % 4);
                for _ in 0..100 {
                    cache.store(&key, Bytes::from(vec![i; 8]), TTL);
                    let entry = cache.lookup(&key).unwrap();
                    // Whole entries only: every byte comes from the same writer.
                    let first = entry.payload()[0];
                    assert!(entry.payload().iter().all(|b| *b == first));
                }
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(cache.len(), 4);
    }
}
