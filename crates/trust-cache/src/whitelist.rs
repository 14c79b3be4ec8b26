//! Per-request whitelist resolution.
//!
//! For the default `file` source the cache walks a fixed fallback chain and
//! stops at the first non-empty result:
//!
//! 1. fresh precomputed entry for the observer
//! 2. forced refresh of the observer's entry
//! 3. fresh precomputed entry for the owner
//! 4. forced refresh of the owner's entry
//! 5. the on-disk whitelist file
//!
//! Steps 3 and 4 are skipped when the observer is the owner. The `neo4j`
//! source skips the chain and queries the graph directly, caching non-empty
//! results per observer for a short TTL in an LRU bounded by
//! `direct_capacity`. `None` means no trust data is available.

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::WhitelistConfig;
use crate::error::TrustError;
use crate::graph::{fetch_trust_rows, GraphClient};
use crate::precompute::PrecomputeManager;
use crate::types::{ObserverId, PrecomputedEntry, Whitelist, WhitelistOrigin, WhitelistSource};
use crate::whitelist_file::WhitelistSet;

#[derive(Debug)]
struct FileSnapshot {
    set: Arc<WhitelistSet>,
    modified: Option<SystemTime>,
    loaded: Instant,
}

pub struct WhitelistCache {
    precompute: PrecomputeManager,
    graph: Arc<dyn GraphClient>,
    config: WhitelistConfig,
    file: Mutex<Option<Arc<FileSnapshot>>>,
    direct: Mutex<LruCache<ObserverId, Arc<PrecomputedEntry>>>,
    file_loads: AtomicU64,
}

impl WhitelistCache {
    pub fn new(
        precompute: PrecomputeManager,
        graph: Arc<dyn GraphClient>,
        config: WhitelistConfig,
    ) -> Self {
        let capacity = NonZeroUsize::new(config.direct_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            precompute,
            graph,
            config,
            file: Mutex::new(None),
            direct: Mutex::new(LruCache::new(capacity)),
            file_loads: AtomicU64::new(0),
        }
    }

    pub fn precompute(&self) -> &PrecomputeManager {
        &self.precompute
    }

    /// How many times the whitelist file has been read from disk.
    pub fn file_loads(&self) -> u64 {
        self.file_loads.load(Ordering::Relaxed)
    }

    /// Observers currently held by the `neo4j` source cache.
    pub fn direct_len(&self) -> usize {
        self.direct.lock().len()
    }

    /// Resolve a non-empty whitelist, or `None` when no source has one.
    pub async fn resolve(&self, source: WhitelistSource, observer: &ObserverId) -> Option<Whitelist> {
        match source {
            WhitelistSource::File => self.resolve_chain(observer).await,
            WhitelistSource::Neo4j => self.resolve_direct(observer).await,
        }
    }

    async fn resolve_chain(&self, observer: &ObserverId) -> Option<Whitelist> {
        if let Some(wl) = self
            .from_precompute(observer, WhitelistOrigin::Precomputed, WhitelistOrigin::Refreshed)
            .await
        {
            return Some(wl);
        }

        if !observer.is_owner() {
            debug!(observer = %observer, "no observer whitelist, degrading to owner view");
            if let Some(wl) = self
                .from_precompute(
                    &ObserverId::Owner,
                    WhitelistOrigin::OwnerPrecomputed,
                    WhitelistOrigin::OwnerRefreshed,
                )
                .await
            {
                return Some(wl);
            }
        }

        self.from_file().await
    }

    async fn from_precompute(
        &self,
        observer: &ObserverId,
        cached_origin: WhitelistOrigin,
        refreshed_origin: WhitelistOrigin,
    ) -> Option<Whitelist> {
        if let Some(entry) = self
            .precompute
            .get_for_observer(observer, self.precompute.max_age())
            .filter(|e| !e.is_empty())
        {
            return Some(Whitelist::from_entry(entry, cached_origin));
        }

        match self.precompute.refresh_for_observer(observer, true).await {
            Ok(entry) if !entry.is_empty() => Some(Whitelist::from_entry(entry, refreshed_origin)),
            Ok(_) => {
                debug!(observer = %observer, "forced refresh returned an empty whitelist");
                None
            }
            Err(e) => {
                warn!(observer = %observer, error = %e, "forced whitelist refresh failed");
                None
            }
        }
    }

    async fn from_file(&self) -> Option<Whitelist> {
        match self.load_file().await {
            Ok(Some(snapshot)) if !snapshot.set.is_empty() => Some(Whitelist::from_file(
                snapshot.set.clone(),
                snapshot.loaded.elapsed(),
            )),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "whitelist file unusable");
                None
            }
        }
    }

    /// Current file snapshot, re-reading the file when its modification time
    /// changed or the cached copy outlived the file TTL. A missing file is
    /// `Ok(None)`.
    async fn load_file(&self) -> Result<Option<Arc<FileSnapshot>>, TrustError> {
        let path = self.config.file_path.as_path();
        let modified = match tokio::fs::metadata(path).await {
            Ok(meta) => meta.modified().ok(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "whitelist file not found");
                return Ok(None);
            }
            Err(e) => return Err(file_error(path, e)),
        };

        let cached = self.file.lock().clone();
        if let Some(snapshot) = cached {
            if snapshot.modified == modified && snapshot.loaded.elapsed() < self.config.file_ttl() {
                return Ok(Some(snapshot));
            }
        }

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| file_error(path, e))?;
        self.file_loads.fetch_add(1, Ordering::Relaxed);
        let set = WhitelistSet::from_json(&text).map_err(|e| file_error(path, e))?;
        debug!(path = %path.display(), size = set.len(), "loaded whitelist file");

        let snapshot = Arc::new(FileSnapshot {
            set: Arc::new(set),
            modified,
            loaded: Instant::now(),
        });
        *self.file.lock() = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Fresh cached entry, evicting an expired one.
    fn cached_direct(&self, observer: &ObserverId) -> Option<Arc<PrecomputedEntry>> {
        let mut direct = self.direct.lock();
        match direct.get(observer) {
            Some(entry) if entry.is_fresh(self.config.direct_ttl()) => Some(entry.clone()),
            Some(_) => {
                direct.pop(observer);
                None
            }
            None => None,
        }
    }

    async fn resolve_direct(&self, observer: &ObserverId) -> Option<Whitelist> {
        if let Some(entry) = self.cached_direct(observer) {
            return non_empty(entry);
        }

        match fetch_trust_rows(self.graph.as_ref(), observer).await {
            Ok(rows) => {
                let entry = Arc::new(PrecomputedEntry::from_rows(rows));
                if !entry.is_empty() {
                    self.direct.lock().put(observer.clone(), entry.clone());
                }
                non_empty(entry)
            }
            Err(e) => {
                warn!(observer = %observer, error = %e, "direct whitelist query failed");
                None
            }
        }
    }
}

fn non_empty(entry: Arc<PrecomputedEntry>) -> Option<Whitelist> {
    (!entry.is_empty()).then(|| Whitelist::from_entry(entry, WhitelistOrigin::Neo4j))
}

fn file_error(path: &Path, reason: impl ToString) -> TrustError {
    TrustError::WhitelistFile {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
