//! Escaping for the two matcher families the search passes use.
//!
//! Raw relay output nests the profile JSON inside the event's `content`
//! string, so a name like `"ally"` appears on the line as `\"ally\"`.
//! [`escape_literal`] produces that on-the-wire form so plain substring
//! needles can run against raw lines without parsing. [`escape_regex`]
//! wraps `regex::escape` so user input can be spliced into a field-anchored
//! pattern.

/// Encode `input` the way it appears inside a kind 0 event line: JSON string
/// escaping applied twice (once for the profile object, once for the
/// event's `content` field), without surrounding quotes.
pub fn escape_literal(input: &str) -> String {
    json_escape(&json_escape(input))
}

/// Escape `input` so it matches itself literally inside a regex.
pub fn escape_regex(input: &str) -> String {
    regex::escape(input)
}

// One level of JSON string escaping, matching serde_json's output (which is
// also what relays emit: no escaping of `/` or non-ASCII).
fn json_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    for c in input.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}
