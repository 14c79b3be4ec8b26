//! Borrowed view over one scanned event line.
//!
//! Relay scans emit one JSON event per line. The search passes only need the
//! author pubkey, the kind, and (for field-anchored passes) the kind 0
//! content, so the line is deserialised into borrowed fields and the rest is
//! ignored.

use serde::Deserialize;
use std::borrow::Cow;

/// Kind 0: profile metadata.
pub const PROFILE_KIND: u16 = 0;

/// The subset of a Nostr event the search passes look at.
#[derive(Debug, Deserialize)]
pub struct ScannedEvent<'a> {
    #[serde(borrow)]
    pub pubkey: Cow<'a, str>,
    pub kind: u16,
    #[serde(borrow, default)]
    pub content: Cow<'a, str>,
}

/// Profile metadata fields the targeted passes match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    DisplayName,
}

impl ProfileField {
    pub fn key(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::DisplayName => "display_name",
        }
    }
}

impl<'a> ScannedEvent<'a> {
    /// Read a string field out of the kind 0 content JSON.
    ///
    /// Returns `None` when the content is not a JSON object or the field is
    /// missing or not a string.
    pub fn profile_field(&self, field: ProfileField) -> Option<String> {
        let value: serde_json::Value = serde_json::from_str(&self.content).ok()?;
        value
            .get(field.key())
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Parse a scanned line as a kind 0 event. Malformed lines and other kinds
/// yield `None`.
pub fn parse_profile_line(line: &str) -> Option<ScannedEvent<'_>> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }
    let event: ScannedEvent<'_> = serde_json::from_str(line).ok()?;
    (event.kind == PROFILE_KIND).then_some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn line(kind: u16, content: serde_json::Value) -> String {
        json!({
            "id": "00",
            "pubkey": "AB".repeat(32),
            "created_at": 1700000000,
            "kind": kind,
            "tags": [],
            "content": content.to_string(),
            "sig": "00",
        })
        .to_string()
    }

    #[test]
    fn parses_profile_fields() {
        let l = line(0, json!({"name": "alice", "display_name": "Alice A."}));
        let ev = parse_profile_line(&l).unwrap();
        assert_eq!(ev.pubkey, "AB".repeat(32));
        assert_eq!(ev.profile_field(ProfileField::Name).as_deref(), Some("alice"));
        assert_eq!(
            ev.profile_field(ProfileField::DisplayName).as_deref(),
            Some("Alice A.")
        );
    }

    #[test]
    fn other_kinds_skipped() {
        assert!(parse_profile_line(&line(1, json!({"name": "x"}))).is_none());
    }

    #[test]
    fn malformed_skipped() {
        assert!(parse_profile_line("{\"pubkey\": \"ab\", \"kind\":").is_none());
        assert!(parse_profile_line("").is_none());
        assert!(parse_profile_line("\n").is_none());
    }

    #[test]
    fn non_string_field_is_none() {
        let l = line(0, json!({"name": 42}));
        let ev = parse_profile_line(&l).unwrap();
        assert!(ev.profile_field(ProfileField::Name).is_none());
    }

    #[test]
    fn content_not_json() {
        let raw = json!({"pubkey": "ab", "kind": 0, "content": "hello"}).to_string();
        let ev = parse_profile_line(&raw).unwrap();
        assert!(ev.profile_field(ProfileField::Name).is_none());
    }
}
