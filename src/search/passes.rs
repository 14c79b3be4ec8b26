//! Multi-pass content search.
//!
//! One search runs, concurrently:
//! - two targeted passes (`name`, `display_name`; exact, case-sensitive),
//! - one broad pass (case-insensitive substring anywhere on the line),
//!
//! and, only when both targeted passes come back empty, an exhaustive
//! fallback: the two field regex passes under one shared deadline, then the
//! literal-value pass if there is still nothing and time remains.
//!
//! Every pass owns its scan stream and stops on its own deadline, line cap
//! or result cap by dropping the stream. Hits from targeted and exhaustive
//! passes rank first in completion order, broad hits follow in scan order,
//! and a pubkey appears at most once.

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::cache::{normalize_query, SearchCache};
use super::matcher::{LineMatcher, PassKind};
use super::scanner::{ContentScanner, ScanError, ScanFilter};

/// Why a pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    Completed,
    TimedOut,
    LineCap,
    ResultCap,
    Failed,
}

impl PassOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::LineCap => "line_cap",
            Self::ResultCap => "result_cap",
            Self::Failed => "failed",
        }
    }
}

/// Telemetry for one pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassTiming {
    pub pass: PassKind,
    pub elapsed_ms: u64,
    pub lines: usize,
    pub hits: usize,
    pub outcome: PassOutcome,
}

/// Budgets for every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassLimits {
    pub targeted_timeout: Duration,
    pub targeted_max_results: usize,
    /// Queries of at most this many characters get `short_query_factor`
    /// times the targeted timeout.
    pub short_query_len: usize,
    pub short_query_factor: u32,
    pub broad_timeout: Duration,
    pub broad_max_lines: usize,
    pub broad_max_results: usize,
    /// Shared by all exhaustive passes.
    pub exhaustive_timeout: Duration,
    pub exhaustive_max_results: usize,
}

impl Default for PassLimits {
    fn default() -> Self {
        Self {
            targeted_timeout: Duration::from_millis(1500),
            targeted_max_results: 50,
            short_query_len: 3,
            short_query_factor: 2,
            broad_timeout: Duration::from_millis(4000),
            broad_max_lines: 200_000,
            broad_max_results: 500,
            exhaustive_timeout: Duration::from_millis(8000),
            exhaustive_max_results: 50,
        }
    }
}

impl PassLimits {
    fn targeted_timeout_for(&self, query: &str) -> Duration {
        if query.chars().count() <= self.short_query_len {
            self.targeted_timeout.saturating_mul(self.short_query_factor)
        } else {
            self.targeted_timeout
        }
    }
}

/// `now + budget`, clamped to roughly thirty years out.
fn deadline_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365 * 30))
}

#[derive(Debug, Clone, Copy)]
struct PassBudget {
    deadline: Instant,
    max_lines: Option<usize>,
    max_results: Option<usize>,
}

/// Merged output of one content search.
#[derive(Debug, Clone)]
pub struct ContentResult {
    pub pubkeys: Arc<Vec<String>>,
    pub cache_hit: bool,
    pub passes: Vec<PassTiming>,
    pub elapsed: Duration,
}

// ── Hit collection ──────────────────────────────────────────────

#[derive(Default)]
struct HitSink {
    state: Mutex<SinkState>,
}

#[derive(Default)]
struct SinkState {
    boosted_seen: HashSet<String>,
    boosted: Vec<String>,
    broad_seen: HashSet<String>,
    broad: Vec<String>,
}

impl HitSink {
    /// Record a hit; `true` when it is new for the pass's tier.
    fn offer(&self, pass: PassKind, pubkey: String) -> bool {
        let mut state = self.state.lock();
        let state = &mut *state;
        let (seen, list) = if pass.is_boosted() {
            (&mut state.boosted_seen, &mut state.boosted)
        } else {
            (&mut state.broad_seen, &mut state.broad)
        };
        if !seen.insert(pubkey.clone()) {
            return false;
        }
        list.push(pubkey);
        true
    }

    fn boosted_is_empty(&self) -> bool {
        self.state.lock().boosted.is_empty()
    }

    /// Boosted hits, then broad hits not already boosted.
    fn merge(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut out = state.boosted.clone();
        out.extend(
            state
                .broad
                .iter()
                .filter(|pk| !state.boosted_seen.contains(*pk))
                .cloned(),
        );
        out
    }
}

// ── One pass ────────────────────────────────────────────────────

struct PassRun<'a> {
    matcher: &'a LineMatcher,
    sink: &'a HitSink,
    budget: PassBudget,
    carry: Vec<u8>,
    lines: usize,
    hits: usize,
}

impl<'a> PassRun<'a> {
    fn new(matcher: &'a LineMatcher, sink: &'a HitSink, budget: PassBudget) -> Self {
        Self {
            matcher,
            sink,
            budget,
            carry: Vec::new(),
            lines: 0,
            hits: 0,
        }
    }

    async fn scan(&mut self, scanner: &dyn ContentScanner) -> Result<PassOutcome, ScanError> {
        let mut stream = scanner.scan(&ScanFilter::profiles()).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.carry.extend_from_slice(&chunk);
            if let Some(stop) = self.drain_lines() {
                return Ok(stop);
            }
        }
        Ok(self.finish().unwrap_or(PassOutcome::Completed))
    }

    /// Process every complete line in the carry buffer.
    fn drain_lines(&mut self) -> Option<PassOutcome> {
        let mut buf = std::mem::take(&mut self.carry);
        let mut start = 0;
        let mut stop = None;
        while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            stop = self.feed(&buf[start..end]);
            start = end + 1;
            if stop.is_some() {
                break;
            }
        }
        buf.drain(..start);
        self.carry = buf;
        stop
    }

    /// Parse a trailing line that never got its newline.
    fn finish(&mut self) -> Option<PassOutcome> {
        if self.carry.iter().all(u8::is_ascii_whitespace) {
            self.carry.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.carry);
        self.feed(&rest)
    }

    fn feed(&mut self, line: &[u8]) -> Option<PassOutcome> {
        self.lines += 1;
        if let Some(pubkey) = std::str::from_utf8(line)
            .ok()
            .and_then(|l| self.matcher.match_line(l))
        {
            if self.sink.offer(self.matcher.pass(), pubkey) {
                self.hits += 1;
            }
        }
        if self.budget.max_results.is_some_and(|max| self.hits >= max) {
            return Some(PassOutcome::ResultCap);
        }
        if self.budget.max_lines.is_some_and(|max| self.lines >= max) {
            return Some(PassOutcome::LineCap);
        }
        None
    }
}

async fn run_pass(
    scanner: &dyn ContentScanner,
    matcher: &LineMatcher,
    sink: &HitSink,
    budget: PassBudget,
) -> PassTiming {
    let started = Instant::now();
    let mut run = PassRun::new(matcher, sink, budget);

    let scanned = tokio::time::timeout_at(budget.deadline, run.scan(scanner)).await;
    let outcome = match scanned {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(pass = %matcher.pass(), error = %e, "search pass failed");
            PassOutcome::Failed
        }
        Err(_) => {
            run.finish();
            PassOutcome::TimedOut
        }
    };

    let timing = PassTiming {
        pass: matcher.pass(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        lines: run.lines,
        hits: run.hits,
        outcome,
    };
    debug!(
        pass = %timing.pass,
        outcome = timing.outcome.as_str(),
        lines = timing.lines,
        hits = timing.hits,
        elapsed_ms = timing.elapsed_ms,
        "search pass finished"
    );
    timing
}

// ── Content search ──────────────────────────────────────────────

/// Runs the passes for a query and caches merged results.
pub struct ContentSearch {
    scanner: Arc<dyn ContentScanner>,
    limits: PassLimits,
    cache: SearchCache,
}

impl ContentSearch {
    pub fn new(scanner: Arc<dyn ContentScanner>, limits: PassLimits, cache: SearchCache) -> Self {
        Self {
            scanner,
            limits,
            cache,
        }
    }

    pub fn cache(&self) -> &SearchCache {
        &self.cache
    }

    /// Candidate pubkeys for `query`, most relevant first.
    ///
    /// Results are cached by normalised query unless a pass failed.
    pub async fn search(&self, query: &str) -> ContentResult {
        let started = Instant::now();
        let query = normalize_query(query);

        if let Some(pubkeys) = self.cache.get(&query) {
            debug!(query = %query, results = pubkeys.len(), "search cache hit");
            return ContentResult {
                pubkeys,
                cache_hit: true,
                passes: Vec::new(),
                elapsed: started.elapsed(),
            };
        }

        let sink = HitSink::default();
        let (broad, mut boosted) = tokio::join!(
            self.broad_pass(&query, &sink),
            self.boosted_passes(&query, &sink),
        );

        let mut passes = broad.into_iter().collect::<Vec<_>>();
        passes.append(&mut boosted);
        let pubkeys = Arc::new(sink.merge());

        if passes.iter().any(|p| p.outcome == PassOutcome::Failed) {
            debug!(query = %query, "not caching results of a failed pass");
        } else {
            self.cache.insert(query.clone(), pubkeys.clone());
        }

        ContentResult {
            pubkeys,
            cache_hit: false,
            passes,
            elapsed: started.elapsed(),
        }
    }

    async fn broad_pass(&self, query: &str, sink: &HitSink) -> Option<PassTiming> {
        let matcher = LineMatcher::new(PassKind::Broad, query)?;
        let budget = PassBudget {
            deadline: deadline_after(self.limits.broad_timeout),
            max_lines: Some(self.limits.broad_max_lines),
            max_results: Some(self.limits.broad_max_results),
        };
        Some(run_pass(self.scanner.as_ref(), &matcher, sink, budget).await)
    }

    async fn boosted_passes(&self, query: &str, sink: &HitSink) -> Vec<PassTiming> {
        let budget = PassBudget {
            deadline: deadline_after(self.limits.targeted_timeout_for(query)),
            max_lines: None,
            max_results: Some(self.limits.targeted_max_results),
        };
        let mut timings = self
            .concurrent(
                &[PassKind::TargetedName, PassKind::TargetedDisplayName],
                query,
                sink,
                budget,
            )
            .await;

        if !sink.boosted_is_empty() {
            return timings;
        }

        debug!(query = %query, "targeted passes empty, running exhaustive fallback");
        let budget = PassBudget {
            deadline: deadline_after(self.limits.exhaustive_timeout),
            max_lines: None,
            max_results: Some(self.limits.exhaustive_max_results),
        };
        timings.extend(
            self.concurrent(
                &[PassKind::ExhaustiveName, PassKind::ExhaustiveDisplayName],
                query,
                sink,
                budget,
            )
            .await,
        );

        if sink.boosted_is_empty() && Instant::now() < budget.deadline {
            timings.extend(
                self.concurrent(&[PassKind::ExhaustiveLiteral], query, sink, budget)
                    .await,
            );
        }
        timings
    }

    async fn concurrent(
        &self,
        kinds: &[PassKind],
        query: &str,
        sink: &HitSink,
        budget: PassBudget,
    ) -> Vec<PassTiming> {
        let matchers: Vec<LineMatcher> = kinds
            .iter()
            .filter_map(|kind| LineMatcher::new(*kind, query))
            .collect();
        futures_util::future::join_all(
            matchers
                .iter()
                .map(|m| run_pass(self.scanner.as_ref(), m, sink, budget)),
        )
        .await
    }
}
