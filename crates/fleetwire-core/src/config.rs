//! Shared defaults and environment variable names.
//!
//! Constants live here so the pipeline crates and the binary agree on the
//! same values without redefining them.

use std::path::PathBuf;

/// Default values.
pub mod defaults {
    /// Config file looked up when no path is given.
    pub const CONFIG_FILE: &str = "fleetwire.toml";
    /// Default tracing filter.
    pub const LOG_FILTER: &str = "fleetwire=info";
    /// Topic template for device commands.
    pub const COMMAND_TOPIC: &str = "fleetwire/command/{hardware_id}";
    /// Topic template for system messages.
    pub const SYSTEM_TOPIC: &str = "fleetwire/system/{hardware_id}";
    /// Capacity of the channel between a destination and its transport.
    pub const DELIVERY_CHANNEL_CAPACITY: usize = 256;
    /// Delay between batch elements, in milliseconds.
    pub const BATCH_THROTTLE_MS: u64 = 0;
    /// Maximum number of transitions kept per component.
    pub const LIFECYCLE_HISTORY_LIMIT: usize = 64;
}

/// Well-known keys of the transport context map handed to codecs.
pub mod context_keys {
    /// Time the transport received the payload, epoch milliseconds.
    pub const ENQUEUE_TIME: &str = "enqueueTime";
    /// Identifier of the inbound source that produced the payload.
    pub const SOURCE_ID: &str = "sourceId";
}

/// Environment variable names.
pub mod env_vars {
    use super::defaults;
    use std::path::PathBuf;

    pub const CONFIG: &str = "FLEETWIRE_CONFIG";
    pub const LOG_JSON: &str = "FLEETWIRE_LOG_JSON";
    pub const BATCH_THROTTLE_MS: &str = "FLEETWIRE_BATCH_THROTTLE_MS";

    /// Config path from the environment, or the default file name.
    pub fn config_path() -> PathBuf {
        std::env::var(CONFIG)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::CONFIG_FILE))
    }

    /// Whether logs should be emitted as JSON.
    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false)
    }

    /// Batch throttle override, if set and valid.
    pub fn batch_throttle_ms() -> Option<u64> {
        std::env::var(BATCH_THROTTLE_MS)
            .ok()
            .and_then(|v| v.parse().ok())
    }
}

/// Expand a `{hardware_id}` topic template.
pub fn expand_topic(template: &str, hardware_id: &str) -> String {
    template.replace("{hardware_id}", hardware_id)
}

/// Resolve a config path relative to a base directory.
pub fn resolve_relative(base: Option<&std::path::Path>, path: &str) -> PathBuf {
    let candidate = PathBuf::from(path);
    match base {
        Some(dir) if candidate.is_relative() => dir.join(candidate),
        _ => candidate,
    }
}
