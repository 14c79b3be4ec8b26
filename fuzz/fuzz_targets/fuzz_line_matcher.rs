#![no_main]
use brainstorm_search::search::{LineMatcher, PassKind};
use libfuzzer_sys::fuzz_target;

const PASSES: [PassKind; 6] = [
    PassKind::TargetedName,
    PassKind::TargetedDisplayName,
    PassKind::Broad,
    PassKind::ExhaustiveName,
    PassKind::ExhaustiveDisplayName,
    PassKind::ExhaustiveLiteral,
];

// First line is the query, the rest is scanned.
fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    let (query, body) = s.split_once('\n').unwrap_or((s, ""));
    for pass in PASSES {
        if let Some(matcher) = LineMatcher::new(pass, query) {
            for line in body.lines() {
                let _ = matcher.match_line(line);
            }
        }
    }
});
