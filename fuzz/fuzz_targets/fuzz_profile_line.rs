#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Some(event) = nostr_core::parse_profile_line(s) {
            assert_eq!(event.kind, nostr_core::PROFILE_KIND);
        }
    }
});
