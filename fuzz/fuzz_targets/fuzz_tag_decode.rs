#![no_main]

use libfuzzer_sys::fuzz_target;

// Decoding must never panic; whatever decodes must re-encode to the same tags.
fuzz_target!(|data: &[u8]| {
    let Ok(tags) = whistle_bundle::decode_tags(data) else {
        return;
    };
    if tags.is_empty() {
        return;
    }
    let encoded = whistle_bundle::encode_tags(&tags);
    let again = whistle_bundle::decode_tags(&encoded);
    assert!(again.as_ref() == Ok(&tags), "re-encoded tags must decode to the same list");
});
