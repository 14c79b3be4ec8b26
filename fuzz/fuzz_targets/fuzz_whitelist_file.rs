#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(set) = trust_cache::WhitelistSet::from_json(s) {
            assert_eq!(set.is_empty(), set.len() == 0);
        }
    }
});
