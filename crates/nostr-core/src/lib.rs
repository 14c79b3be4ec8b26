//! Shared Nostr primitives for brainstorm-search
//!
//! This crate provides the small pieces both the trust cache and the
//! content search need: hex pubkey normalisation, a borrowed view over
//! scanned kind 0 event lines, and the two escaping functions used to build
//! literal and regex matchers against raw relay output.

pub mod escape;
pub mod event;
pub mod pubkey;

// Re-export commonly used types
pub use escape::{escape_literal, escape_regex};
pub use event::{parse_profile_line, ProfileField, ScannedEvent, PROFILE_KIND};
pub use pubkey::{normalize_pubkey, Pubkey, PubkeyError};
