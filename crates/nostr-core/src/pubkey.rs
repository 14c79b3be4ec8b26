//! Hex pubkey normalisation.
//!
//! Every set-membership test in the search path compares lowercase hex, so
//! pubkeys are normalised once at the boundary (graph rows, whitelist files,
//! scanned events, request parameters) and carried as [`Pubkey`] afterwards.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static HEX64_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{64}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PubkeyError {
    #[error("pubkey must be 64 hex characters, got {0} characters")]
    Length(usize),
    #[error("pubkey contains non-hex characters")]
    NotHex,
}

/// A 64-character lowercase hex public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pubkey(String);

impl Pubkey {
    /// Parse and lowercase a hex pubkey. Surrounding whitespace is ignored.
    pub fn parse(input: &str) -> Result<Self, PubkeyError> {
        let trimmed = input.trim();
        if trimmed.len() != 64 {
            return Err(PubkeyError::Length(trimmed.chars().count()));
        }
        if !HEX64_RE.is_match(trimmed) {
            return Err(PubkeyError::NotHex);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

/// Normalise a pubkey string, returning `None` when it is not 64 hex chars.
pub fn normalize_pubkey(input: &str) -> Option<String> {
    Pubkey::parse(input).ok().map(Pubkey::into_string)
}

impl FromStr for Pubkey {
    type Err = PubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pubkey {
    type Error = PubkeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Pubkey> for String {
    fn from(pk: Pubkey) -> Self {
        pk.0
    }
}

impl AsRef<str> for Pubkey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// Lets `HashSet<Pubkey>` / `HashMap<Pubkey, _>` be queried with `&str`.
impl Borrow<str> for Pubkey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
