#![no_main]

use libfuzzer_sys::fuzz_target;
use merge_core::fetch::parse_fetch_reply;

fuzz_target!(|data: &str| {
    let _ = parse_fetch_reply(data);
});
