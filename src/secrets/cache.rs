//! Secret cache for reducing backend calls
//!
//! Bounded in-memory TTL cache in front of the provider chain. Expired entries
//! are dropped lazily on read and by a background sweep that runs every half
//! TTL. When full, inserting a new key evicts the entry closest to expiry.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;

use super::types::SecretString;

/// Cached secret value with its expiry deadline.
struct CacheEntry {
    value: SecretString,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hits divided by lookups, `0.0` before the first lookup.
    pub hit_rate: f64,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub max_entries: usize,
}

struct CacheInner {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheInner {
    async fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }
}

/// TTL cache with capacity-bounded eviction.
///
/// A single reader/writer lock guards the map: lookups share the read lock and
/// only upgrade to the write lock when they find an expired entry to delete.
/// Dropping the cache stops its background sweep.
pub struct SecretCache {
    inner: Arc<CacheInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl SecretCache {
    /// Create a cache and, when called inside a tokio runtime, start its expiry sweep.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let inner = Arc::new(CacheInner {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        });

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(sweep_loop(Arc::downgrade(&inner), sweep_interval(ttl)))),
            Err(_) => {
                debug!("No tokio runtime available, cache expiry sweep disabled");
                None
            }
        };

        Self { inner, sweeper }
    }

    /// Look up a key. Absent and expired keys both count as a miss.
    pub async fn get(&self, key: &str) -> Option<SecretString> {
        let now = Instant::now();
        {
            let entries = self.inner.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.inner.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Cache hit for secret");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: re-check under the write lock, a writer may have refreshed it.
        let mut entries = self.inner.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(Instant::now())) {
            entries.remove(key);
            debug!(key = %key, "Cache entry expired");
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace a value with the configured TTL.
    pub async fn set(&self, key: &str, value: SecretString) {
        let mut entries = self.inner.entries.write().await;

        if !entries.contains_key(key) && entries.len() >= self.inner.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(victim, _)| victim.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                debug!(evicted = %victim, "Evicted cache entry closest to expiry");
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry { value, expires_at: Instant::now() + self.inner.ttl },
        );
    }

    /// Remove a single key. Returns whether it was present.
    pub async fn delete(&self, key: &str) -> bool {
        self.inner.entries.write().await.remove(key).is_some()
    }

    /// Remove every entry. Counters are kept.
    pub async fn clear(&self) {
        self.inner.entries.write().await.clear();
        debug!("Cleared secret cache");
    }

    /// Drop every expired entry and return how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.inner.cleanup_expired().await
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    /// Whether `key` is stored, expired or not, without touching the counters.
    pub async fn contains(&self, key: &str) -> bool {
        self.inner.entries.read().await.contains_key(key)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            entries: self.len().await,
            hits,
            misses,
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
            ttl: self.inner.ttl,
            max_entries: self.inner.max_entries,
        }
    }
}

impl Drop for SecretCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for SecretCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCache")
            .field("ttl", &self.inner.ttl)
            .field("max_entries", &self.inner.max_entries)
            .finish()
    }
}

fn sweep_interval(ttl: Duration) -> Duration {
    (ttl / 2).max(Duration::from_millis(1))
}

async fn sweep_loop(inner: Weak<CacheInner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let removed = inner.cleanup_expired().await;
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
    }
}
