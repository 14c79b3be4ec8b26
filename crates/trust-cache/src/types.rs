//! Trust data types: observers, metrics, precomputed entries, resolved
//! whitelists.

use chrono::{DateTime, Utc};
use nostr_core::{Pubkey, PubkeyError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::whitelist_file::WhitelistSet;

/// Sentinel observer id for the relay owner's global perspective.
pub const OWNER_OBSERVER: &str = "owner";

/// Minimum influence for whitelist inclusion.
pub const INFLUENCE_THRESHOLD: f64 = 0.01;

// ── Observer ─────────────────────────────────────────────────────

/// The trust perspective a whitelist is computed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObserverId {
    /// The relay owner (global view over `NostrUser` nodes).
    Owner,
    /// A customer's scoped view over their metrics cards.
    Customer(Pubkey),
}

impl ObserverId {
    /// Parse a request's observer parameter.
    ///
    /// Empty input and `owner` map to [`ObserverId::Owner`], as does the
    /// owner's own pubkey when it is known.
    pub fn parse(input: &str, owner_pubkey: Option<&Pubkey>) -> Result<Self, PubkeyError> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(OWNER_OBSERVER) {
            return Ok(Self::Owner);
        }
        let pk = Pubkey::parse(trimmed)?;
        if owner_pubkey == Some(&pk) {
            return Ok(Self::Owner);
        }
        Ok(Self::Customer(pk))
    }

    pub fn is_owner(&self) -> bool {
        matches!(self, Self::Owner)
    }

    /// Key used in logs and API payloads.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Owner => OWNER_OBSERVER,
            Self::Customer(pk) => pk.as_str(),
        }
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Metrics ──────────────────────────────────────────────────────

/// Trust attributes of one pubkey from one observer's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustMetrics {
    pub influence: f64,
    pub verified_follower_count: f64,
    pub verified_muter_count: f64,
    pub verified_reporter_count: f64,
}

/// One row of a trust query.
#[derive(Debug, Clone, PartialEq)]
pub struct TrustRow {
    pub pubkey: Pubkey,
    pub metrics: TrustMetrics,
}

// ── Precomputed entry ────────────────────────────────────────────

/// An immutable whitelist snapshot for one observer.
#[derive(Debug)]
pub struct PrecomputedEntry {
    pub pubkeys: HashSet<Pubkey>,
    /// Influence per pubkey, used for re-ranking.
    pub scores: HashMap<Pubkey, f64>,
    pub metrics: HashMap<Pubkey, TrustMetrics>,
    pub computed_at: DateTime<Utc>,
    created: Instant,
}

impl PrecomputedEntry {
    pub fn from_rows(rows: Vec<TrustRow>) -> Self {
        let mut pubkeys = HashSet::with_capacity(rows.len());
        let mut scores = HashMap::with_capacity(rows.len());
        let mut metrics = HashMap::with_capacity(rows.len());
        for row in rows {
            // Rows arrive ordered by follower count; keep the first occurrence.
            if !pubkeys.insert(row.pubkey.clone()) {
                continue;
            }
            scores.insert(row.pubkey.clone(), row.metrics.influence);
            metrics.insert(row.pubkey, row.metrics);
        }
        Self {
            pubkeys,
            scores,
            metrics,
            computed_at: Utc::now(),
            created: Instant::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    pub fn is_fresh(&self, max_age: Duration) -> bool {
        self.age() < max_age
    }
}

// ── Resolved whitelist ───────────────────────────────────────────

/// Which trust-data source a request may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WhitelistSource {
    /// Precomputed maps with owner and on-disk fallbacks.
    #[default]
    File,
    /// Direct graph query for the observer.
    Neo4j,
}

impl WhitelistSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Neo4j => "neo4j",
        }
    }
}

impl FromStr for WhitelistSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "file" => Ok(Self::File),
            "neo4j" => Ok(Self::Neo4j),
            other => Err(format!("unknown whitelist source: {other}")),
        }
    }
}

/// The resolution step that produced a whitelist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WhitelistOrigin {
    Precomputed,
    Refreshed,
    OwnerPrecomputed,
    OwnerRefreshed,
    File,
    Neo4j,
}

#[derive(Debug, Clone)]
enum WhitelistData {
    Entry(Arc<PrecomputedEntry>),
    File(Arc<WhitelistSet>),
}

/// A resolved, non-empty whitelist for one request.
#[derive(Debug, Clone)]
pub struct Whitelist {
    data: WhitelistData,
    pub origin: WhitelistOrigin,
    pub age: Duration,
}

impl Whitelist {
    pub fn from_entry(entry: Arc<PrecomputedEntry>, origin: WhitelistOrigin) -> Self {
        let age = entry.age();
        Self {
            data: WhitelistData::Entry(entry),
            origin,
            age,
        }
    }

    pub fn from_file(set: Arc<WhitelistSet>, age: Duration) -> Self {
        Self {
            data: WhitelistData::File(set),
            origin: WhitelistOrigin::File,
            age,
        }
    }

    /// Membership test; `pubkey` must already be lowercase.
    pub fn contains(&self, pubkey: &str) -> bool {
        match &self.data {
            WhitelistData::Entry(e) => e.pubkeys.contains(pubkey),
            WhitelistData::File(s) => s.contains(pubkey),
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            WhitelistData::Entry(e) => e.len(),
            WhitelistData::File(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether per-pubkey scores are available for re-ranking.
    pub fn has_scores(&self) -> bool {
        match &self.data {
            WhitelistData::Entry(e) => !e.scores.is_empty(),
            WhitelistData::File(s) => s.has_scores(),
        }
    }

    pub fn score(&self, pubkey: &str) -> Option<f64> {
        match &self.data {
            WhitelistData::Entry(e) => e.scores.get(pubkey).copied(),
            WhitelistData::File(s) => s.score(pubkey),
        }
    }

    /// Metric snapshot, when the whitelist came from a graph query.
    pub fn metrics(&self, pubkey: &str) -> Option<TrustMetrics> {
        match &self.data {
            WhitelistData::Entry(e) => e.metrics.get(pubkey).copied(),
            WhitelistData::File(_) => None,
        }
    }
}
