use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300), // 5 minute TTL
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub payload: V,
    pub inserted_at: Instant,
}

/// Time-based response cache.
///
/// Entries are valid while `now - inserted_at < ttl`. Expired entries are
/// never served by `get` but stay in place until the next write for the same
/// key, so a caller that explicitly allows stale data can still reach them.
pub struct TtlCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    ttl: Duration,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry only
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key)?;
        if entry.inserted_at.elapsed() < self.ttl {
            Some(entry.payload.clone())
        } else {
            debug!("Cache entry {} expired", key);
            None
        }
    }

    /// Any entry, fresh or not, with its age
    pub fn get_stale(&self, key: &str) -> Option<(V, Duration)> {
        self.entries
            .get(key)
            .map(|entry| (entry.payload.clone(), entry.inserted_at.elapsed()))
    }

    pub fn insert(&self, key: impl Into<String>, payload: V) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
