#![no_main]

use libfuzzer_sys::fuzz_target;

// Arbitrary bytes must never panic the parser, and a partial result never
// claims more input than it was given.
fuzz_target!(|data: &[u8]| {
    let parsed = match whistle_bundle::parse_bytes(data) {
        Ok(parsed) => parsed,
        Err(failure) => failure.into_partial(),
    };
    assert!(parsed.bytes_read <= data.len() as u64);
});
