//! On-disk whitelist parsing.
//!
//! The whitelist file has been written in three shapes over time:
//!
//! - array: `["<pubkey>", ...]`
//! - map: `{"<pubkey>": true | false | <score> | ...}`; only `false`
//!   excludes a key
//! - nested array: `[["<pubkey>", <score>?], ...]`
//!
//! All three go through one untagged parse and come out as a
//! [`WhitelistSet`], so nothing downstream branches on the encoding.

use nostr_core::Pubkey;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WhitelistFileFormat {
    Flat(Vec<String>),
    Nested(Vec<Vec<Value>>),
    Keyed(Map<String, Value>),
}

/// Canonical whitelist: lowercase pubkeys plus optional scores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhitelistSet {
    pubkeys: HashSet<Pubkey>,
    scores: HashMap<Pubkey, f64>,
}

impl WhitelistSet {
    /// Parse any supported encoding. Entries that are not valid pubkeys are
    /// skipped.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let format: WhitelistFileFormat = serde_json::from_str(text)?;
        Ok(Self::from_format(format))
    }

    fn from_format(format: WhitelistFileFormat) -> Self {
        let mut set = Self::default();
        match format {
            WhitelistFileFormat::Flat(keys) => {
                for key in keys {
                    set.insert(&key, None);
                }
            }
            WhitelistFileFormat::Nested(entries) => {
                for entry in entries {
                    let Some(key) = entry.first().and_then(Value::as_str) else {
                        continue;
                    };
                    set.insert(key, entry.get(1).and_then(Value::as_f64));
                }
            }
            WhitelistFileFormat::Keyed(map) => {
                for (key, value) in map {
                    match value {
                        Value::Bool(false) => {}
                        Value::Number(n) => set.insert(&key, n.as_f64()),
                        _ => set.insert(&key, None),
                    }
                }
            }
        }
        set
    }

    fn insert(&mut self, key: &str, score: Option<f64>) {
        let Ok(pk) = Pubkey::parse(key) else {
            return;
        };
        if let Some(score) = score {
            self.scores.entry(pk.clone()).or_insert(score);
        }
        self.pubkeys.insert(pk);
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.pubkeys.contains(pubkey)
    }

    pub fn len(&self) -> usize {
        self.pubkeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pubkeys.is_empty()
    }

    pub fn has_scores(&self) -> bool {
        !self.scores.is_empty()
    }

    pub fn score(&self, pubkey: &str) -> Option<f64> {
        self.scores.get(pubkey).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pubkey> {
        self.pubkeys.iter()
    }
}

impl FromIterator<Pubkey> for WhitelistSet {
    fn from_iter<I: IntoIterator<Item = Pubkey>>(iter: I) -> Self {
        Self {
            pubkeys: iter.into_iter().collect(),
            scores: HashMap::new(),
        }
    }
}
