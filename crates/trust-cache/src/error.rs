//! Error type shared by the trust cache.
//!
//! `TrustError` is `Clone`: a single failed refresh is delivered to every
//! caller waiting on the same in-flight query.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrustError {
    #[error("graph request failed: {0}")]
    GraphUnavailable(String),

    #[error("graph query rejected: {code}: {message}")]
    GraphQuery { code: String, message: String },

    #[error("graph response malformed: {0}")]
    GraphResponse(String),

    #[error("customer registry {path}: {reason}")]
    Registry { path: String, reason: String },

    #[error("whitelist file {path}: {reason}")]
    WhitelistFile { path: String, reason: String },

    #[error("refresh task ended early: {0}")]
    RefreshAborted(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for TrustError {
    fn from(e: reqwest::Error) -> Self {
        Self::GraphUnavailable(e.to_string())
    }
}
