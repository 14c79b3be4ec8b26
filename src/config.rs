use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use nostr_core::Pubkey;
use trust_cache::{CustomersConfig, GraphConfig, PrecomputeConfig, WhitelistConfig};

use crate::search::{PassLimits, RequestLimits};

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub neo4j: GraphConfig,
    #[serde(default)]
    pub strfry: StrfryConfig,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    #[serde(default)]
    pub customers: CustomersConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub precompute: PrecomputeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct OwnerConfig {
    /// Relay owner's hex pubkey; requests naming it use the owner view.
    #[serde(default)]
    pub pubkey: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StrfryConfig {
    #[serde(default = "default_strfry_binary")]
    pub binary: String,
    #[serde(default = "default_strfry_config")]
    pub config: Option<String>,
    /// Scan this JSONL export instead of running the relay binary.
    #[serde(default)]
    pub jsonl_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SearchConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
    #[serde(default = "default_max_query_len")]
    pub max_query_len: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_targeted_timeout_ms")]
    pub targeted_timeout_ms: u64,
    #[serde(default = "default_targeted_max_results")]
    pub targeted_max_results: usize,
    #[serde(default = "default_short_query_len")]
    pub short_query_len: usize,
    #[serde(default = "default_short_query_factor")]
    pub short_query_factor: u32,
    #[serde(default = "default_broad_timeout_ms")]
    pub broad_timeout_ms: u64,
    #[serde(default = "default_broad_max_lines")]
    pub broad_max_lines: usize,
    #[serde(default = "default_broad_max_results")]
    pub broad_max_results: usize,
    #[serde(default = "default_exhaustive_timeout_ms")]
    pub exhaustive_timeout_ms: u64,
    #[serde(default = "default_exhaustive_max_results")]
    pub exhaustive_max_results: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

impl Default for StrfryConfig {
    fn default() -> Self {
        Self {
            binary: default_strfry_binary(),
            config: default_strfry_config(),
            jsonl_path: None,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
            max_query_len: default_max_query_len(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_capacity: default_cache_capacity(),
            targeted_timeout_ms: default_targeted_timeout_ms(),
            targeted_max_results: default_targeted_max_results(),
            short_query_len: default_short_query_len(),
            short_query_factor: default_short_query_factor(),
            broad_timeout_ms: default_broad_timeout_ms(),
            broad_max_lines: default_broad_max_lines(),
            broad_max_results: default_broad_max_results(),
            exhaustive_timeout_ms: default_exhaustive_timeout_ms(),
            exhaustive_max_results: default_exhaustive_max_results(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SearchConfig {
    pub fn pass_limits(&self) -> PassLimits {
        PassLimits {
            targeted_timeout: Duration::from_millis(self.targeted_timeout_ms),
            targeted_max_results: self.targeted_max_results,
            short_query_len: self.short_query_len,
            short_query_factor: self.short_query_factor,
            broad_timeout: Duration::from_millis(self.broad_timeout_ms),
            broad_max_lines: self.broad_max_lines,
            broad_max_results: self.broad_max_results,
            exhaustive_timeout: Duration::from_millis(self.exhaustive_timeout_ms),
            exhaustive_max_results: self.exhaustive_max_results,
        }
    }

    pub fn request_limits(&self) -> RequestLimits {
        RequestLimits {
            default_limit: self.default_limit,
            max_limit: self.max_limit,
            max_query_len: self.max_query_len,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_strfry_binary() -> String {
    "/usr/local/bin/strfry".to_string()
}

fn default_strfry_config() -> Option<String> {
    Some("/etc/strfry.conf".to_string())
}

fn default_limit() -> usize {
    20
}

fn default_max_limit() -> usize {
    200
}

fn default_max_query_len() -> usize {
    256
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_cache_capacity() -> usize {
    1024
}

/// Upper bound for any single pass budget (ten minutes).
const MAX_PASS_TIMEOUT_MS: u64 = 600_000;
const MAX_SHORT_QUERY_FACTOR: u32 = 10;

fn default_targeted_timeout_ms() -> u64 {
    1500
}

fn default_targeted_max_results() -> usize {
    50
}

fn default_short_query_len() -> usize {
    3
}

fn default_short_query_factor() -> u32 {
    2
}

fn default_broad_timeout_ms() -> u64 {
    4000
}

fn default_broad_max_lines() -> usize {
    200_000
}

fn default_broad_max_results() -> usize {
    500
}

fn default_exhaustive_timeout_ms() -> u64 {
    8000
}

fn default_exhaustive_max_results() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML config")
    }

    /// `NEO4J_PASSWORD`, `BRAINSTORM_OWNER_PUBKEY` and `BRAINSTORM_BIND`
    /// take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup("NEO4J_PASSWORD") {
            self.neo4j.password = password;
        }
        if let Some(owner) = lookup("BRAINSTORM_OWNER_PUBKEY").filter(|v| !v.trim().is_empty()) {
            self.owner.pubkey = Some(owner);
        }
        if let Some(bind) = lookup("BRAINSTORM_BIND").filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind;
        }
    }

    pub fn expand_paths(&mut self) -> Result<()> {
        self.strfry.binary = shellexpand::tilde(&self.strfry.binary).to_string();
        if let Some(conf) = &self.strfry.config {
            self.strfry.config = Some(shellexpand::tilde(conf).to_string());
        }
        if let Some(jsonl) = &self.strfry.jsonl_path {
            self.strfry.jsonl_path = Some(shellexpand::tilde(jsonl).to_string());
        }
        self.whitelist.file_path = expand_path(&self.whitelist.file_path);
        if let Some(path) = &self.customers.path {
            self.customers.path = Some(expand_path(path));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Validate bind address
        if self.server.bind.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!("Invalid bind address: {}", self.server.bind);
        }

        // Validate Neo4j URI
        if !self.neo4j.uri.starts_with("http://") && !self.neo4j.uri.starts_with("https://") {
            anyhow::bail!("Neo4j URI must start with http:// or https://");
        }
        if self.neo4j.database.trim().is_empty() {
            anyhow::bail!("Neo4j database name cannot be empty");
        }

        if let Some(owner) = &self.owner.pubkey {
            Pubkey::parse(owner).with_context(|| format!("Invalid owner pubkey: {}", owner))?;
        }

        if self.strfry.jsonl_path.is_none() && self.strfry.binary.trim().is_empty() {
            anyhow::bail!("strfry.binary is required unless strfry.jsonl_path is set");
        }

        let search = &self.search;
        if search.max_limit == 0 {
            anyhow::bail!("search.max_limit must be at least 1");
        }
        if search.default_limit == 0 || search.default_limit > search.max_limit {
            anyhow::bail!(
                "search.default_limit must be between 1 and search.max_limit ({})",
                search.max_limit
            );
        }
        if search.max_query_len == 0 {
            anyhow::bail!("search.max_query_len must be at least 1");
        }
        for (name, ms) in [
            ("targeted_timeout_ms", search.targeted_timeout_ms),
            ("broad_timeout_ms", search.broad_timeout_ms),
            ("exhaustive_timeout_ms", search.exhaustive_timeout_ms),
        ] {
            if ms == 0 || ms > MAX_PASS_TIMEOUT_MS {
                anyhow::bail!(
                    "search.{} must be between 1 and {}",
                    name,
                    MAX_PASS_TIMEOUT_MS
                );
            }
        }
        if !(1..=MAX_SHORT_QUERY_FACTOR).contains(&search.short_query_factor) {
            anyhow::bail!(
                "search.short_query_factor must be between 1 and {}",
                MAX_SHORT_QUERY_FACTOR
            );
        }

        if self.precompute.max_age_secs == 0 {
            anyhow::bail!("precompute.max_age_secs must be greater than zero");
        }

        Ok(())
    }

    pub fn owner_pubkey(&self) -> Option<Pubkey> {
        self.owner
            .pubkey
            .as_deref()
            .and_then(|pk| Pubkey::parse(pk).ok())
    }
}

fn expand_path(path: &std::path::Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}
