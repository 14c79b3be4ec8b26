//! Search request handling: content search and whitelist resolution run
//! side by side, then candidates are trust-filtered, ranked and truncated.
//!
//! With no usable whitelist the default is fail-closed: an empty result
//! labelled `whitelist: "unavailable"`. Only an explicit `fail_open` returns
//! unfiltered candidates, and then always with a warning.

use nostr_core::{Pubkey, PubkeyError};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};
use trust_cache::{
    ObserverId, TrustMetrics, Whitelist, WhitelistCache, WhitelistOrigin, WhitelistSource,
};

use super::cache::normalize_query;
use super::passes::{ContentResult, ContentSearch, PassTiming};
use crate::metrics::Metrics;

/// Label for results withheld because no whitelist could be resolved.
pub const WHITELIST_UNAVAILABLE: &str = "unavailable";

const FAIL_OPEN_WARNING: &str = "trust whitelist unavailable; results are not trust-filtered";

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("searchString is required")]
    EmptyQuery,
    #[error("searchString exceeds {max} characters")]
    QueryTooLong { max: usize },
    #[error("invalid observerPubkey: {0}")]
    InvalidObserver(#[from] PubkeyError),
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("invalid {param}: {value}")]
    InvalidParam { param: &'static str, value: String },
}

/// Request-level bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_query_len: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 200,
            max_query_len: 256,
        }
    }
}

impl RequestLimits {
    /// Requested limit clamped to `[1, max_limit]`.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub search_string: String,
    pub limit: Option<usize>,
    pub source: WhitelistSource,
    /// `None`, empty or `owner` selects the owner's perspective.
    pub observer: Option<String>,
    pub fail_open: bool,
    pub debug: bool,
}

impl SearchRequest {
    pub fn new(search_string: impl Into<String>) -> Self {
        Self {
            search_string: search_string.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Counts {
    pub before_filter: usize,
    pub after_filter: usize,
    pub whitelist_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDebug {
    pub cache_hit: bool,
    pub content_ms: u64,
    pub whitelist_ms: u64,
    pub filter_us: u64,
    pub sort_us: u64,
    pub total_ms: u64,
    pub ranked_by_score: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist_origin: Option<WhitelistOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist_age_secs: Option<u64>,
    pub passes: Vec<PassTiming>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub search_string: String,
    pub source: WhitelistSource,
    pub observer: String,
    pub counts: Counts,
    pub pubkeys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BTreeMap<String, TrustMetrics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<SearchDebug>,
}

pub struct SearchOrchestrator {
    content: ContentSearch,
    whitelists: Arc<WhitelistCache>,
    metrics: Arc<Metrics>,
    owner: Option<Pubkey>,
    limits: RequestLimits,
}

impl SearchOrchestrator {
    pub fn new(content: ContentSearch, whitelists: Arc<WhitelistCache>, metrics: Arc<Metrics>) -> Self {
        Self {
            content,
            whitelists,
            metrics,
            owner: None,
            limits: RequestLimits::default(),
        }
    }

    /// Requests naming this pubkey are served from the owner's perspective.
    pub fn with_owner(mut self, owner: Option<Pubkey>) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_limits(mut self, limits: RequestLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn content(&self) -> &ContentSearch {
        &self.content
    }

    pub fn whitelists(&self) -> &WhitelistCache {
        &self.whitelists
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn limits(&self) -> &RequestLimits {
        &self.limits
    }

    pub fn owner(&self) -> Option<&Pubkey> {
        self.owner.as_ref()
    }

    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();
        let (query, observer) = match self.validate(&request) {
            Ok(valid) => valid,
            Err(e) => {
                self.metrics.record_search("invalid", started.elapsed().as_secs_f64());
                return Err(e);
            }
        };
        let limit = self.limits.clamp(request.limit);

        let (content, (whitelist, whitelist_ms)) = tokio::join!(
            self.content.search(&query),
            async {
                let resolve_started = Instant::now();
                let whitelist = self.whitelists.resolve(request.source, &observer).await;
                (whitelist, resolve_started.elapsed().as_millis() as u64)
            }
        );

        self.metrics.record_cache(content.cache_hit);
        for pass in &content.passes {
            self.metrics.record_pass(pass);
        }

        let mut response = SearchResponse {
            success: true,
            search_string: query,
            source: request.source,
            observer: observer.to_string(),
            counts: Counts {
                before_filter: content.pubkeys.len(),
                ..Default::default()
            },
            pubkeys: Vec::new(),
            metrics: None,
            whitelist: None,
            warning: None,
            debug: None,
        };
        let mut debug = request.debug.then(|| SearchDebug {
            cache_hit: content.cache_hit,
            content_ms: content.elapsed.as_millis() as u64,
            whitelist_ms,
            filter_us: 0,
            sort_us: 0,
            total_ms: 0,
            ranked_by_score: false,
            whitelist_origin: None,
            whitelist_age_secs: None,
            passes: content.passes.clone(),
        });

        let outcome = match whitelist.filter(|w| !w.is_empty()) {
            Some(whitelist) => {
                self.metrics.record_whitelist(origin_label(whitelist.origin));
                self.apply_whitelist(&content, &whitelist, limit, &mut response, debug.as_mut());
                "filtered"
            }
            None => {
                self.metrics.record_whitelist(WHITELIST_UNAVAILABLE);
                response.whitelist = Some(WHITELIST_UNAVAILABLE);
                if request.fail_open {
                    warn!(
                        query = %response.search_string,
                        observer = %response.observer,
                        "whitelist unavailable, returning unfiltered results"
                    );
                    response.pubkeys = content.pubkeys.iter().take(limit).cloned().collect();
                    response.counts.after_filter = content.pubkeys.len();
                    response.warning = Some(FAIL_OPEN_WARNING.to_string());
                    "fail_open"
                } else {
                    warn!(
                        query = %response.search_string,
                        observer = %response.observer,
                        "whitelist unavailable, withholding results"
                    );
                    "unavailable"
                }
            }
        };

        let elapsed = started.elapsed();
        if let Some(debug) = debug.as_mut() {
            debug.total_ms = elapsed.as_millis() as u64;
        }
        response.debug = debug;
        self.metrics.record_search(outcome, elapsed.as_secs_f64());
        info!(
            query = %response.search_string,
            observer = %response.observer,
            source = request.source.as_str(),
            candidates = response.counts.before_filter,
            returned = response.pubkeys.len(),
            cache_hit = content.cache_hit,
            outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "keyword search"
        );
        Ok(response)
    }

    fn validate(&self, request: &SearchRequest) -> Result<(String, ObserverId), SearchError> {
        let query = normalize_query(&request.search_string);
        if query.is_empty() {
            return Err(SearchError::EmptyQuery);
        }
        if query.chars().count() > self.limits.max_query_len {
            return Err(SearchError::QueryTooLong {
                max: self.limits.max_query_len,
            });
        }
        let observer =
            ObserverId::parse(request.observer.as_deref().unwrap_or(""), self.owner.as_ref())?;
        Ok((query, observer))
    }

    fn apply_whitelist(
        &self,
        content: &ContentResult,
        whitelist: &Whitelist,
        limit: usize,
        response: &mut SearchResponse,
        debug: Option<&mut SearchDebug>,
    ) {
        let filter_started = Instant::now();
        let mut kept: Vec<&String> = content
            .pubkeys
            .iter()
            .filter(|pk| whitelist.contains(pk))
            .collect();
        let filter_us = filter_started.elapsed().as_micros() as u64;

        let sort_started = Instant::now();
        let ranked = whitelist.has_scores();
        if ranked {
            let score = |pk: &str| whitelist.score(pk).unwrap_or(0.0);
            kept.sort_by(|a, b| score(b.as_str()).total_cmp(&score(a.as_str())));
        }
        let sort_us = sort_started.elapsed().as_micros() as u64;

        response.counts.after_filter = kept.len();
        response.counts.whitelist_size = whitelist.len();
        response.pubkeys = kept.into_iter().take(limit).cloned().collect();

        if response.source == WhitelistSource::Neo4j {
            response.metrics = Some(
                response
                    .pubkeys
                    .iter()
                    .filter_map(|pk| whitelist.metrics(pk).map(|m| (pk.clone(), m)))
                    .collect(),
            );
        }

        if let Some(debug) = debug {
            debug.filter_us = filter_us;
            debug.sort_us = sort_us;
            debug.ranked_by_score = ranked;
            debug.whitelist_origin = Some(whitelist.origin);
            debug.whitelist_age_secs = Some(whitelist.age.as_secs());
        }
    }
}

fn origin_label(origin: WhitelistOrigin) -> &'static str {
    match origin {
        WhitelistOrigin::Precomputed => "precomputed",
        WhitelistOrigin::Refreshed => "refreshed",
        WhitelistOrigin::OwnerPrecomputed => "owner_precomputed",
        WhitelistOrigin::OwnerRefreshed => "owner_refreshed",
        WhitelistOrigin::File => "file",
        WhitelistOrigin::Neo4j => "neo4j",
    }
}
