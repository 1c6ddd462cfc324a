//! Configuration keys and constants read through `HostBridge::get_conf`.
//!
//! Every value the core reads from the host task is named here so there's
//! exactly one place that knows the string keys the original Java/C++ side
//! used, and the defaults that apply when a key is unset.

use crate::bridge::HostBridge;
use crate::error::{MergeError, Result};

pub const CODEC_CONF_KEY: &str = "io.compression.codec.lzo.decompressor";
pub const DEFAULT_CODEC: &str = "LZO1X_SAFE";

pub const COMPRESS_MAP_OUTPUT_CONF_KEY: &str = "mapred.compress.map.output";

pub const PARALLEL_LPQS_CONF_KEY: &str = "mapred.rdma.num.parallel.lpqs";
pub const MIN_PARALLEL_LPQS: usize = 1;

/// How many fetch completions accumulate before a progress report is
/// pushed to the host bridge, mirroring the original's `PROGRESS_REPORT_LIMIT`.
pub const PROGRESS_REPORT_LIMIT: u32 = 20;

/// Number of staging buffers a sink-draining `SegmentMergeQueue` keeps.
/// The original always used exactly one; kept as a named constant rather
/// than a magic number anywhere it's used.
pub const NUM_STAGE_MEM: usize = 1;

pub fn resolve_codec_name(bridge: &dyn HostBridge) -> String {
    bridge.get_conf(CODEC_CONF_KEY, DEFAULT_CODEC)
}

/// `Some(codec_name)` if map output compression is enabled, `None` if
/// compression is off and MOF buffers carry raw record bytes directly.
pub fn resolve_compression(bridge: &dyn HostBridge) -> Option<String> {
    let enabled = bridge.get_conf(COMPRESS_MAP_OUTPUT_CONF_KEY, "false");
    if enabled.eq_ignore_ascii_case("true") {
        Some(resolve_codec_name(bridge))
    } else {
        None
    }
}

/// Resolve the configured leaf-queue fan-out, clamped to `MIN_PARALLEL_LPQS`
/// the same way the original clamps a zero or unset value up to 1 rather
/// than treating it as "no leaf queues". A value that isn't a valid
/// integer is a configuration error, fatal at startup, not a silent zero.
pub fn resolve_num_parallel_lpqs(bridge: &dyn HostBridge) -> Result<usize> {
    let raw = bridge.get_conf(PARALLEL_LPQS_CONF_KEY, "0");
    let parsed: usize = raw.trim().parse().map_err(|_| MergeError::ConfigParse {
        key: PARALLEL_LPQS_CONF_KEY.to_string(),
        value: raw.clone(),
    })?;
    Ok(parsed.max(MIN_PARALLEL_LPQS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::StaticHostBridge;
    use std::collections::HashMap;

    #[test]
    fn unset_codec_falls_back_to_default() {
        let bridge = StaticHostBridge::empty();
        assert_eq!(resolve_codec_name(&bridge), DEFAULT_CODEC);
    }

    #[test]
    fn zero_or_unset_parallel_lpqs_clamps_to_minimum() {
        let bridge = StaticHostBridge::empty();
        assert_eq!(resolve_num_parallel_lpqs(&bridge).unwrap(), MIN_PARALLEL_LPQS);

        let mut conf = HashMap::new();
        conf.insert(PARALLEL_LPQS_CONF_KEY.to_string(), "0".to_string());
        let bridge = StaticHostBridge::new(conf);
        assert_eq!(resolve_num_parallel_lpqs(&bridge).unwrap(), MIN_PARALLEL_LPQS);
    }

    #[test]
    fn configured_parallel_lpqs_is_honored() {
        let mut conf = HashMap::new();
        conf.insert(PARALLEL_LPQS_CONF_KEY.to_string(), "4".to_string());
        let bridge = StaticHostBridge::new(conf);
        assert_eq!(resolve_num_parallel_lpqs(&bridge).unwrap(), 4);
    }

    #[test]
    fn malformed_parallel_lpqs_is_a_fatal_config_error() {
        let mut conf = HashMap::new();
        conf.insert(PARALLEL_LPQS_CONF_KEY.to_string(), "not-a-number".to_string());
        let bridge = StaticHostBridge::new(conf);
        let err = resolve_num_parallel_lpqs(&bridge).unwrap_err();
        assert!(matches!(
            err,
            MergeError::ConfigParse { key, value }
                if key == PARALLEL_LPQS_CONF_KEY && value == "not-a-number"
        ));
    }

    #[test]
    fn compression_defaults_off() {
        let bridge = StaticHostBridge::empty();
        assert_eq!(resolve_compression(&bridge), None);
    }

    #[test]
    fn compression_enabled_resolves_codec_name() {
        let mut conf = HashMap::new();
        conf.insert(COMPRESS_MAP_OUTPUT_CONF_KEY.to_string(), "true".to_string());
        conf.insert(CODEC_CONF_KEY.to_string(), "LZO1X".to_string());
        let bridge = StaticHostBridge::new(conf);
        assert_eq!(
            resolve_compression(&bridge),
            Some("LZO1X".to_string())
        );
    }
}
