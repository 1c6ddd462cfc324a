#![no_main]

use libfuzzer_sys::fuzz_target;
use merge_core::decompressor::read_block_header;

fuzz_target!(|data: &[u8]| {
    let _ = read_block_header(data);
});
