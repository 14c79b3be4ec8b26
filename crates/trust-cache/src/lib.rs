//! Trust whitelists for brainstorm-search.
//!
//! This crate owns everything between the graph database and the search
//! orchestrator: the two trust query shapes, a per-observer precomputed
//! whitelist map with in-flight refresh deduplication, the on-disk whitelist
//! file, and the per-request resolution that falls back across them.
//! Snapshots are handed out as `Arc`s and replaced wholesale, never mutated.

pub mod config;
pub mod customers;
pub mod error;
pub mod graph;
pub mod precompute;
pub mod types;
pub mod whitelist;
pub mod whitelist_file;

pub use config::{CustomersConfig, GraphConfig, PrecomputeConfig, WhitelistConfig};
pub use customers::{Customer, CustomerRegistry, FileCustomerRegistry, NoCustomers};
pub use error::TrustError;
pub use graph::{fetch_trust_rows, trust_query, GraphClient, GraphQuery, Neo4jHttpClient};
pub use precompute::{ObserverStatus, PrecomputeManager, RefreshOutcome, RefreshReport};
pub use types::{
    ObserverId, PrecomputedEntry, TrustMetrics, TrustRow, Whitelist, WhitelistOrigin,
    WhitelistSource, INFLUENCE_THRESHOLD, OWNER_OBSERVER,
};
pub use whitelist::WhitelistCache;
pub use whitelist_file::WhitelistSet;
