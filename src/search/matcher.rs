//! Per-pass line matchers.
//!
//! Every matcher first runs a cheap needle over the raw line and only parses
//! JSON for lines that pass it. Raw lines carry the profile JSON nested
//! inside the event's `content` string, so needles are built with
//! [`escape_literal`].

use nostr_core::{escape_literal, escape_regex, normalize_pubkey, parse_profile_line, ProfileField};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;

/// The scan passes, in the order they may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    TargetedName,
    TargetedDisplayName,
    Broad,
    ExhaustiveName,
    ExhaustiveDisplayName,
    ExhaustiveLiteral,
}

impl PassKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetedName => "targeted_name",
            Self::TargetedDisplayName => "targeted_display_name",
            Self::Broad => "broad",
            Self::ExhaustiveName => "exhaustive_name",
            Self::ExhaustiveDisplayName => "exhaustive_display_name",
            Self::ExhaustiveLiteral => "exhaustive_literal",
        }
    }

    /// Hits from boosted passes rank ahead of broad hits.
    pub fn is_boosted(self) -> bool {
        !matches!(self, Self::Broad)
    }
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
enum RawNeedle {
    /// Case-sensitive substring.
    Exact(String),
    /// Case-insensitive literal.
    Folded(Regex),
}

impl RawNeedle {
    fn folded(literal: &str) -> Option<Self> {
        RegexBuilder::new(&escape_regex(literal))
            .case_insensitive(true)
            .build()
            .ok()
            .map(Self::Folded)
    }

    fn is_match(&self, line: &str) -> bool {
        match self {
            Self::Exact(needle) => line.contains(needle.as_str()),
            Self::Folded(re) => re.is_match(line),
        }
    }
}

#[derive(Debug, Clone)]
enum ContentRule {
    /// Any kind 0 event that passed the raw needle.
    Any,
    /// The profile field contains the query, case-sensitively.
    FieldContains(ProfileField, String),
    /// Pattern over the decoded profile JSON.
    Pattern(Regex),
}

/// Decides whether one raw line is a hit for one pass.
#[derive(Debug, Clone)]
pub struct LineMatcher {
    pass: PassKind,
    needle: RawNeedle,
    rule: ContentRule,
}

impl LineMatcher {
    /// Build the matcher for `pass`. Returns `None` when the pass cannot
    /// express `query`: the field regex passes run on decoded profile JSON
    /// and skip queries containing `"` or `\`, whose encoding differs there.
    pub fn new(pass: PassKind, query: &str) -> Option<Self> {
        let literal = escape_literal(query);
        let (needle, rule) = match pass {
            PassKind::TargetedName => (
                RawNeedle::Exact(literal),
                ContentRule::FieldContains(ProfileField::Name, query.to_string()),
            ),
            PassKind::TargetedDisplayName => (
                RawNeedle::Exact(literal),
                ContentRule::FieldContains(ProfileField::DisplayName, query.to_string()),
            ),
            PassKind::Broad => (RawNeedle::folded(&literal)?, ContentRule::Any),
            PassKind::ExhaustiveName | PassKind::ExhaustiveDisplayName => {
                if query.contains(['"', '\\']) {
                    return None;
                }
                let field = if pass == PassKind::ExhaustiveName {
                    ProfileField::Name
                } else {
                    ProfileField::DisplayName
                };
                let pattern = format!(
                    r#""{}"\s*:\s*"(?:[^"\\]|\\.)*?{}"#,
                    field.key(),
                    escape_regex(query)
                );
                let re = RegexBuilder::new(&pattern)
                    .case_insensitive(true)
                    .build()
                    .ok()?;
                (RawNeedle::folded(&literal)?, ContentRule::Pattern(re))
            }
            PassKind::ExhaustiveLiteral => {
                // A complete string value: its delimiting quotes are escaped
                // once on the raw line, its text twice.
                let value = format!("\\\"{literal}\\\"");
                (RawNeedle::folded(&value)?, ContentRule::Any)
            }
        };
        Some(Self { pass, needle, rule })
    }

    pub fn pass(&self) -> PassKind {
        self.pass
    }

    /// The normalised author pubkey when `line` is a hit.
    pub fn match_line(&self, line: &str) -> Option<String> {
        if !self.needle.is_match(line) {
            return None;
        }
        let event = parse_profile_line(line)?;
        let hit = match &self.rule {
            ContentRule::Any => true,
            ContentRule::FieldContains(field, query) => event
                .profile_field(*field)
                .is_some_and(|value| value.contains(query.as_str())),
            ContentRule::Pattern(re) => re.is_match(&event.content),
        };
        if !hit {
            return None;
        }
        normalize_pubkey(&event.pubkey)
    }
}
