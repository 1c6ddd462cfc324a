//! The narrow seam between this crate and the host reduce task.
//!
//! Everything the core needs from the outside world — configuration
//! strings, progress reporting, and handing merged bytes back to the
//! consumer — goes through `HostBridge`. No other module talks to the host
//! directly; this keeps the cross-language bridge coupling in one place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub trait HostBridge: Send + Sync {
    /// Look up a configuration string, falling back to `default` if unset.
    fn get_conf(&self, key: &str, default: &str) -> String;

    /// Called when a tracked fetch completes, for progress reporting.
    fn fetch_over(&self);

    /// Hand a chunk of merged key/value bytes to the consumer.
    fn data_ready(&self, buf: &[u8]);

    /// Register a buffer for zero-copy handoff and return an opaque handle.
    /// The default implementation returns 0, meaning "no registration
    /// available"; callers must not assume registration succeeded.
    fn register_direct_buffer(&self, _buf: &[u8]) -> u64 {
        0
    }
}

/// Test/demo double: configuration backed by a fixed map, `data_ready`
/// chunks collected in memory, `fetch_over` calls counted.
pub struct StaticHostBridge {
    conf: HashMap<String, String>,
    fetch_over_calls: AtomicUsize,
    delivered: Mutex<Vec<Vec<u8>>>,
}

impl StaticHostBridge {
    pub fn new(conf: HashMap<String, String>) -> Self {
        Self {
            conf,
            fetch_over_calls: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn fetch_over_count(&self) -> usize {
        self.fetch_over_calls.load(Ordering::SeqCst)
    }

    /// All bytes delivered via `data_ready`, concatenated in delivery order.
    pub fn delivered_bytes(&self) -> Vec<u8> {
        self.delivered.lock().unwrap().concat()
    }

    pub fn delivered_chunk_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

impl HostBridge for StaticHostBridge {
    fn get_conf(&self, key: &str, default: &str) -> String {
        self.conf
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn fetch_over(&self) {
        self.fetch_over_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn data_ready(&self, buf: &[u8]) {
        self.delivered.lock().unwrap().push(buf.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_when_key_absent() {
        let bridge = StaticHostBridge::empty();
        assert_eq!(bridge.get_conf("some.key", "fallback"), "fallback");
    }

    #[test]
    fn reads_configured_value() {
        let mut conf = HashMap::new();
        conf.insert("codec".to_string(), "LZO1X_SAFE".to_string());
        let bridge = StaticHostBridge::new(conf);
        assert_eq!(bridge.get_conf("codec", "unused"), "LZO1X_SAFE");
    }

    #[test]
    fn collects_delivered_bytes_in_order() {
        let bridge = StaticHostBridge::empty();
        bridge.data_ready(b"abc");
        bridge.data_ready(b"def");
        assert_eq!(bridge.delivered_bytes(), b"abcdef");
        assert_eq!(bridge.delivered_chunk_count(), 2);
    }

    #[test]
    fn counts_fetch_over_calls() {
        let bridge = StaticHostBridge::empty();
        bridge.fetch_over();
        bridge.fetch_over();
        assert_eq!(bridge.fetch_over_count(), 2);
    }
}
