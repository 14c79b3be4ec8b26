//! Configuration sections owned by the trust cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Neo4j HTTP endpoint settings (`[neo4j]`).
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphConfig {
    #[serde(default = "default_graph_uri")]
    pub uri: String,
    #[serde(default = "default_graph_database")]
    pub database: String,
    #[serde(default = "default_graph_user")]
    pub user: String,
    /// Usually supplied through `NEO4J_PASSWORD` instead of the file.
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_graph_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Precomputed whitelist map settings (`[precompute]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrecomputeConfig {
    /// Entries older than this are stale for request-time lookups.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Period of the background refresh loop. `0` disables the loop.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

/// On-disk whitelist and direct-query caching (`[whitelist]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WhitelistConfig {
    #[serde(default = "default_whitelist_path")]
    pub file_path: PathBuf,
    #[serde(default = "default_file_ttl_secs")]
    pub file_ttl_secs: u64,
    /// Lifetime of per-observer results for the `neo4j` source.
    #[serde(default = "default_direct_ttl_secs")]
    pub direct_ttl_secs: u64,
    /// Most observers kept by the `neo4j` source cache.
    #[serde(default = "default_direct_capacity")]
    pub direct_capacity: usize,
}

/// Customer registry location (`[customers]`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CustomersConfig {
    /// JSON registry file. Unset means the owner is the only observer.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl fmt::Debug for GraphConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphConfig")
            .field("uri", &self.uri)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl GraphConfig {
    /// `POST` target of the transactional HTTP API.
    pub fn commit_endpoint(&self) -> String {
        format!(
            "{}/db/{}/tx/commit",
            self.uri.trim_end_matches('/'),
            self.database
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl PrecomputeConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}

impl WhitelistConfig {
    pub fn file_ttl(&self) -> Duration {
        Duration::from_secs(self.file_ttl_secs)
    }

    pub fn direct_ttl(&self) -> Duration {
        Duration::from_secs(self.direct_ttl_secs)
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: default_graph_uri(),
            database: default_graph_database(),
            user: default_graph_user(),
            password: String::new(),
            request_timeout_secs: default_graph_timeout_secs(),
        }
    }
}

impl Default for PrecomputeConfig {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
        }
    }
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            file_path: default_whitelist_path(),
            file_ttl_secs: default_file_ttl_secs(),
            direct_ttl_secs: default_direct_ttl_secs(),
            direct_capacity: default_direct_capacity(),
        }
    }
}

fn default_graph_uri() -> String {
    "http://localhost:7474".to_string()
}

fn default_graph_database() -> String {
    "neo4j".to_string()
}

fn default_graph_user() -> String {
    "neo4j".to_string()
}

fn default_graph_timeout_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    900
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_whitelist_path() -> PathBuf {
    PathBuf::from("/usr/local/lib/strfry/plugins/data/whitelist_pubkeys.json")
}

fn default_file_ttl_secs() -> u64 {
    60
}

fn default_direct_ttl_secs() -> u64 {
    30
}

fn default_direct_capacity() -> usize {
    256
}
