//! Customer registry: which observers get a precomputed whitelist.

use async_trait::async_trait;
use nostr_core::Pubkey;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::TrustError;

/// An active customer, i.e. an observer with its own trust perspective.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub pubkey: Pubkey,
    pub name: Option<String>,
}

#[async_trait]
pub trait CustomerRegistry: Send + Sync {
    async fn active_customers(&self) -> Result<Vec<Customer>, TrustError>;
}

/// Registry for deployments without customers: only the owner is refreshed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomers;

#[async_trait]
impl CustomerRegistry for NoCustomers {
    async fn active_customers(&self) -> Result<Vec<Customer>, TrustError> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct CustomerRecord {
    pubkey: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CustomersFile {
    Keyed { customers: BTreeMap<String, CustomerRecord> },
    Wrapped { customers: Vec<CustomerRecord> },
    List(Vec<CustomerRecord>),
}

/// Registry backed by a JSON file, re-read on every call.
///
/// Accepts `{"customers": {"<key>": {...}}}`, `{"customers": [...]}` or a
/// bare array. Only records with `"status": "active"` are returned; keyed
/// records without a name are named after their key.
#[derive(Debug, Clone)]
pub struct FileCustomerRegistry {
    path: PathBuf,
}

impl FileCustomerRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn registry_error(&self, reason: impl ToString) -> TrustError {
        TrustError::Registry {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CustomerRegistry for FileCustomerRegistry {
    async fn active_customers(&self) -> Result<Vec<Customer>, TrustError> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.registry_error(e))?;
        let parsed: CustomersFile =
            serde_json::from_str(&text).map_err(|e| self.registry_error(e))?;
        Ok(active_from(parsed))
    }
}

fn active_from(file: CustomersFile) -> Vec<Customer> {
    let records: Vec<(Option<String>, CustomerRecord)> = match file {
        CustomersFile::Keyed { customers } => customers
            .into_iter()
            .map(|(key, rec)| (Some(key), rec))
            .collect(),
        CustomersFile::Wrapped { customers } | CustomersFile::List(customers) => {
            customers.into_iter().map(|rec| (None, rec)).collect()
        }
    };

    let mut out: Vec<Customer> = Vec::new();
    for (key, rec) in records {
        let active = rec
            .status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("active"));
        if !active {
            continue;
        }
        let Ok(pubkey) = Pubkey::parse(&rec.pubkey) else {
            debug!(pubkey = %rec.pubkey, "skipping customer with invalid pubkey");
            continue;
        };
        if out.iter().any(|c| c.pubkey == pubkey) {
            continue;
        }
        out.push(Customer {
            pubkey,
            name: rec.name.or(key),
        });
    }
    out
}
