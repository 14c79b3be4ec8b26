//! Per-observer precomputed whitelists.
//!
//! Each observer's whitelist is one graph query away, and that query is too
//! slow to run per search request. The manager keeps the latest result per
//! observer as an immutable `Arc<PrecomputedEntry>` and refreshes it on
//! demand or from a background loop.
//!
//! Invariants:
//! - an entry is only ever replaced wholesale, after a successful query;
//! - a failed refresh leaves the previous entry in place;
//! - an empty result is kept only for the owner, so observers without
//!   trust data never accumulate in the map;
//! - at most one graph query per observer is outstanding. Concurrent
//!   refreshes join the in-flight query and all receive its result.

use chrono::{DateTime, Utc};
use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::customers::CustomerRegistry;
use crate::error::TrustError;
use crate::graph::{fetch_trust_rows, GraphClient};
use crate::types::{ObserverId, PrecomputedEntry};

type RefreshResult = Result<Arc<PrecomputedEntry>, TrustError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Result of refreshing one observer during [`PrecomputeManager::refresh_all`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub observer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl RefreshOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of a batch refresh. One failing observer never hides another.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    pub outcomes: Vec<RefreshOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_error: Option<String>,
}

impl RefreshReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Snapshot of one cached entry, for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObserverStatus {
    pub observer: String,
    pub size: usize,
    pub computed_at: DateTime<Utc>,
    pub age_secs: u64,
    pub fresh: bool,
    pub refreshing: bool,
}

struct Inner {
    graph: Arc<dyn GraphClient>,
    customers: Arc<dyn CustomerRegistry>,
    max_age: Duration,
    entries: RwLock<HashMap<ObserverId, Arc<PrecomputedEntry>>>,
    in_flight: Mutex<HashMap<ObserverId, SharedRefresh>>,
    queries: AtomicU64,
}

/// Clears an observer's in-flight refresh when the refresh task ends,
/// including by panic.
struct InFlightSlot {
    inner: Arc<Inner>,
    observer: ObserverId,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.observer);
    }
}

/// Cheaply cloneable handle to the precomputed whitelist map.
#[derive(Clone)]
pub struct PrecomputeManager {
    inner: Arc<Inner>,
}

impl PrecomputeManager {
    pub fn new(
        graph: Arc<dyn GraphClient>,
        customers: Arc<dyn CustomerRegistry>,
        max_age: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                graph,
                customers,
                max_age,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                queries: AtomicU64::new(0),
            }),
        }
    }

    /// Default freshness bound for request-time lookups.
    pub fn max_age(&self) -> Duration {
        self.inner.max_age
    }

    /// Number of graph queries issued so far.
    pub fn queries_issued(&self) -> u64 {
        self.inner.queries.load(Ordering::Relaxed)
    }

    /// The cached entry if it is younger than `max_age`. Never queries.
    pub fn get_for_observer(
        &self,
        observer: &ObserverId,
        max_age: Duration,
    ) -> Option<Arc<PrecomputedEntry>> {
        self.inner
            .entries
            .read()
            .get(observer)
            .filter(|e| e.is_fresh(max_age))
            .cloned()
    }

    /// The cached entry regardless of age.
    pub fn peek(&self, observer: &ObserverId) -> Option<Arc<PrecomputedEntry>> {
        self.inner.entries.read().get(observer).cloned()
    }

    /// Refresh one observer's entry.
    ///
    /// Without `force`, a fresh entry is returned as is. A refresh already
    /// in flight for the observer is joined rather than duplicated.
    pub async fn refresh_for_observer(&self, observer: &ObserverId, force: bool) -> RefreshResult {
        if !force {
            if let Some(entry) = self.get_for_observer(observer, self.inner.max_age) {
                return Ok(entry);
            }
        }

        let pending = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(observer) {
                Some(pending) => {
                    debug!(observer = %observer, "joining in-flight precompute refresh");
                    pending.clone()
                }
                None => {
                    let pending = Self::start_refresh(self.inner.clone(), observer.clone());
                    in_flight.insert(observer.clone(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// The query runs on its own task: it completes, and frees the
    /// in-flight slot, even after every caller has been dropped.
    fn start_refresh(inner: Arc<Inner>, observer: ObserverId) -> SharedRefresh {
        let task = tokio::spawn(Self::run_refresh(inner, observer.clone()));
        task.map(move |joined| {
            joined.unwrap_or_else(|e| Err(TrustError::RefreshAborted(format!("{observer}: {e}"))))
        })
        .boxed()
        .shared()
    }

    async fn run_refresh(inner: Arc<Inner>, observer: ObserverId) -> RefreshResult {
        let _slot = InFlightSlot {
            inner: inner.clone(),
            observer: observer.clone(),
        };
        let started = Instant::now();
        inner.queries.fetch_add(1, Ordering::Relaxed);

        match fetch_trust_rows(inner.graph.as_ref(), &observer).await {
            Ok(rows) => {
                let entry = Arc::new(PrecomputedEntry::from_rows(rows));
                if entry.is_empty() && !observer.is_owner() {
                    inner.entries.write().remove(&observer);
                    debug!(observer = %observer, "empty precompute result not retained");
                    return Ok(entry);
                }
                inner
                    .entries
                    .write()
                    .insert(observer.clone(), entry.clone());
                info!(
                    observer = %observer,
                    size = entry.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "precomputed whitelist refreshed"
                );
                Ok(entry)
            }
            Err(e) => {
                warn!(
                    observer = %observer,
                    error = %e,
                    "precompute refresh failed, keeping previous entry"
                );
                Err(e)
            }
        }
    }

    /// Refresh the owner and every active customer.
    ///
    /// Observers are refreshed concurrently and independently. A registry
    /// failure is reported but the owner is still refreshed.
    pub async fn refresh_all(&self, force: bool) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut observers: Vec<(ObserverId, Option<String>)> = vec![(ObserverId::Owner, None)];

        match self.inner.customers.active_customers().await {
            Ok(customers) => {
                observers.extend(
                    customers
                        .into_iter()
                        .map(|c| (ObserverId::Customer(c.pubkey), c.name)),
                );
            }
            Err(e) => {
                warn!(error = %e, "customer registry unavailable, refreshing owner only");
                report.registry_error = Some(e.to_string());
            }
        }

        let refreshes = observers.into_iter().map(|(observer, name)| async move {
            let started = Instant::now();
            let result = self.refresh_for_observer(&observer, force).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(entry) => RefreshOutcome {
                    observer: observer.to_string(),
                    name,
                    size: Some(entry.len()),
                    error: None,
                    elapsed_ms,
                },
                Err(e) => RefreshOutcome {
                    observer: observer.to_string(),
                    name,
                    size: None,
                    error: Some(e.to_string()),
                    elapsed_ms,
                },
            }
        });
        report.outcomes = join_all(refreshes).await;
        report
    }

    /// Per-observer cache status, owner first.
    pub fn status(&self) -> Vec<ObserverStatus> {
        let refreshing: Vec<ObserverId> = self.inner.in_flight.lock().keys().cloned().collect();
        let entries = self.inner.entries.read();
        let mut out: Vec<ObserverStatus> = entries
            .iter()
            .map(|(observer, entry)| ObserverStatus {
                observer: observer.to_string(),
                size: entry.len(),
                computed_at: entry.computed_at,
                age_secs: entry.age().as_secs(),
                fresh: entry.is_fresh(self.inner.max_age),
                refreshing: refreshing.contains(observer),
            })
            .collect();
        out.sort_by(|a, b| {
            (a.observer != crate::types::OWNER_OBSERVER)
                .cmp(&(b.observer != crate::types::OWNER_OBSERVER))
                .then_with(|| a.observer.cmp(&b.observer))
        });
        out
    }

    /// Spawn a task that runs a forced [`refresh_all`](Self::refresh_all)
    /// every `interval`, starting immediately.
    pub fn spawn_refresh_loop(&self, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let report = manager.refresh_all(true).await;
                info!(
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    registry_ok = report.registry_error.is_none(),
                    "precompute refresh cycle finished"
                );
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::customers::{Customer, NoCustomers};
    use crate::graph::GraphQuery;
    use async_trait::async_trait;
    use nostr_core::Pubkey;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    fn hex(c: char) -> String {
        c.to_string().repeat(64)
    }

    /// Graph stub: answers every query with fixed rows after a delay, or
    /// fails while `failing` is set.
    struct StubGraph {
        calls: AtomicUsize,
        delay: Duration,
        failing: parking_lot::Mutex<bool>,
        rows: Vec<Vec<Value>>,
    }

    impl StubGraph {
        fn new(rows: Vec<Vec<Value>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                failing: parking_lot::Mutex::new(false),
                rows,
            }
        }
    }

    #[async_trait]
    impl GraphClient for StubGraph {
        async fn run(&self, _query: &GraphQuery) -> Result<Vec<Vec<Value>>, TrustError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if *self.failing.lock() {
                return Err(TrustError::GraphUnavailable("connection refused".into()));
            }
            Ok(self.rows.clone())
        }
    }

    fn rows() -> Vec<Vec<Value>> {
        vec![
            vec![json!(hex('a')), json!(0.8), json!(10), json!(0), json!(0)],
            vec![json!(hex('b')), json!(0.2), json!(3), json!(0), json!(0)],
        ]
    }

    fn manager(graph: Arc<StubGraph>) -> PrecomputeManager {
        PrecomputeManager::new(graph, Arc::new(NoCustomers), Duration::from_secs(60))
    }

    #[tokio::test(start_paused = true)]
    async fn get_never_queries() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());
        assert!(m.get_for_observer(&ObserverId::Owner, Duration::from_secs(60)).is_none());
        assert_eq!(graph.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_reused_unless_forced() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());

        let first = m.refresh_for_observer(&ObserverId::Owner, false).await.unwrap();
        let second = m.refresh_for_observer(&ObserverId::Owner, false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);

        let forced = m.refresh_for_observer(&ObserverId::Owner, true).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &forced));
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_triggers_query() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());
        m.refresh_for_observer(&ObserverId::Owner, false).await.unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(m.get_for_observer(&ObserverId::Owner, m.max_age()).is_none());
        assert!(m.peek(&ObserverId::Owner).is_some());

        m.refresh_for_observer(&ObserverId::Owner, false).await.unwrap();
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_forced_refreshes_share_one_query() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());

        let (a, b) = tokio::join!(
            m.refresh_for_observer(&ObserverId::Owner, true),
            m.refresh_for_observer(&ObserverId::Owner, true),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);
        assert_eq!(m.queries_issued(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_keeps_previous_and_reaches_all_waiters() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());
        let before = m.refresh_for_observer(&ObserverId::Owner, true).await.unwrap();

        *graph.failing.lock() = true;
        let (a, b) = tokio::join!(
            m.refresh_for_observer(&ObserverId::Owner, true),
            m.refresh_for_observer(&ObserverId::Owner, true),
        );
        assert!(matches!(a, Err(TrustError::GraphUnavailable(_))));
        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2);

        let kept = m.peek(&ObserverId::Owner).unwrap();
        assert!(Arc::ptr_eq(&before, &kept));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cleared_after_completion() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());
        m.refresh_for_observer(&ObserverId::Owner, true).await.unwrap();
        m.refresh_for_observer(&ObserverId::Owner, true).await.unwrap();
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2);
        assert!(m.status().iter().all(|s| !s.refreshing));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_result_kept_for_owner_only() {
        let graph = Arc::new(StubGraph::new(Vec::new()));
        let m = manager(graph.clone());
        let customer = ObserverId::Customer(Pubkey::parse(&hex('c')).unwrap());

        let entry = m.refresh_for_observer(&customer, true).await.unwrap();
        assert!(entry.is_empty());
        assert!(m.peek(&customer).is_none());

        m.refresh_for_observer(&ObserverId::Owner, true).await.unwrap();
        assert!(m.peek(&ObserverId::Owner).is_some());
        assert_eq!(m.status().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_refresh_still_completes() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());

        let waited = tokio::time::timeout(
            Duration::from_millis(10),
            m.refresh_for_observer(&ObserverId::Owner, true),
        )
        .await;
        assert!(waited.is_err());
        assert!(m.inner.in_flight.lock().contains_key(&ObserverId::Owner));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(m.inner.in_flight.lock().is_empty());
        assert!(m.peek(&ObserverId::Owner).is_some());

        m.refresh_for_observer(&ObserverId::Owner, false).await.unwrap();
        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);
    }

    struct FixedCustomers(Result<Vec<Customer>, TrustError>);

    #[async_trait]
    impl CustomerRegistry for FixedCustomers {
        async fn active_customers(&self) -> Result<Vec<Customer>, TrustError> {
            self.0.clone()
        }
    }

    /// Fails only for one observer pubkey.
    struct SelectiveGraph {
        bad_observer: String,
    }

    #[async_trait]
    impl GraphClient for SelectiveGraph {
        async fn run(&self, query: &GraphQuery) -> Result<Vec<Vec<Value>>, TrustError> {
            if query.parameters.get("observer").and_then(Value::as_str)
                == Some(self.bad_observer.as_str())
            {
                return Err(TrustError::GraphUnavailable("timeout".into()));
            }
            Ok(rows())
        }
    }

    #[tokio::test]
    async fn refresh_all_isolates_failures() {
        let customers = vec![
            Customer { pubkey: Pubkey::parse(&hex('c')).unwrap(), name: Some("carol".into()) },
            Customer { pubkey: Pubkey::parse(&hex('d')).unwrap(), name: Some("dave".into()) },
        ];
        let m = PrecomputeManager::new(
            Arc::new(SelectiveGraph { bad_observer: hex('c') }),
            Arc::new(FixedCustomers(Ok(customers))),
            Duration::from_secs(60),
        );

        let report = m.refresh_all(true).await;
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        let carol = report.outcomes.iter().find(|o| o.name.as_deref() == Some("carol")).unwrap();
        assert!(carol.error.is_some());

        let status = m.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].observer, "owner");
        assert_eq!(status[1].observer, hex('d'));
    }

    #[tokio::test]
    async fn registry_failure_still_refreshes_owner() {
        let m = PrecomputeManager::new(
            Arc::new(SelectiveGraph { bad_observer: String::new() }),
            Arc::new(FixedCustomers(Err(TrustError::Registry {
                path: "customers.json".into(),
                reason: "missing".into(),
            }))),
            Duration::from_secs(60),
        );
        let report = m.refresh_all(false).await;
        assert!(report.registry_error.is_some());
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_runs_immediately() {
        let graph = Arc::new(StubGraph::new(rows()));
        let m = manager(graph.clone());
        let handle = m.spawn_refresh_loop(Duration::from_secs(300));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(graph.calls.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(graph.calls.load(Ordering::SeqCst), 2);
        handle.abort();
    }
}
