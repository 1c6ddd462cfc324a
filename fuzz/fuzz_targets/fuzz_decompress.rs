#![no_main]

use libfuzzer_sys::fuzz_target;
use merge_core::decompressor::Registry;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1_000_000 {
        return;
    }
    let registry = Registry::resolve("LZO1X_SAFE").unwrap();
    let mut out = Vec::new();
    // A corrupt block must return an error, never panic.
    let _ = registry.decode_block(data, &mut out);
});
