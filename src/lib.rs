//! Trust-filtered keyword profile search.
//!
//! Profiles are found by scanning kind 0 events out of a strfry relay in
//! several budgeted passes, then filtered to the pubkeys an observer trusts
//! according to whitelists precomputed from a Neo4j trust graph.

pub mod api;
pub mod config;
pub mod metrics;
pub mod search;

pub use config::Config;
pub use metrics::Metrics;
pub use search::{SearchOrchestrator, SearchRequest, SearchResponse};
