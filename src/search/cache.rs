//! Query result cache: LRU-bounded, entries expire after a fixed TTL.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_CAPACITY: usize = 1024;

/// Cache key for a query: trimmed, inner whitespace runs collapsed to one
/// space. Case is preserved because the targeted passes are case-sensitive.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Clone)]
struct CachedSearch {
    pubkeys: Arc<Vec<String>>,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct SearchCache {
    entries: Mutex<LruCache<String, CachedSearch>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SearchCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Cached result for an already normalised query. Expired entries are
    /// evicted on lookup.
    pub fn get(&self, query: &str) -> Option<Arc<Vec<String>>> {
        let mut entries = self.entries.lock();
        let found = match entries.get(query) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.pubkeys.clone()),
            Some(_) => {
                entries.pop(query);
                None
            }
            None => None,
        };
        drop(entries);

        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store a result. Concurrent misses for one query both insert; the
    /// last writer wins.
    pub fn insert(&self, query: String, pubkeys: Arc<Vec<String>>) {
        self.entries.lock().put(
            query,
            CachedSearch {
                pubkeys,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
