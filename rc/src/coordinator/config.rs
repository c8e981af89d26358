//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Name a coordinator is published under when none is given
pub const DEFAULT_NAME: &str = "relay";

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Well-known name peers use to find the coordinator
    #[serde(default = "default_name")]
    pub name: String,

    /// Directory holding the published socket (None = runtime dir)
    #[serde(rename = "socket-dir", default)]
    pub socket_dir: Option<PathBuf>,

    /// Per-recipient delivery timeout in milliseconds
    #[serde(rename = "delivery-timeout-ms", default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,

    /// Largest accepted frame in bytes
    #[serde(rename = "max-frame-bytes", default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Drop a peer after this many consecutive failed deliveries (None = never)
    #[serde(rename = "evict-after-failures", default)]
    pub evict_after_failures: Option<u32>,
}

fn default_name() -> String {
    debug!("default_name: called");
    DEFAULT_NAME.to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    debug!("default_delivery_timeout_ms: called");
    2000
}

fn default_max_frame_bytes() -> usize {
    debug!("default_max_frame_bytes: called");
    64 * 1024
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            name: default_name(),
            socket_dir: None,
            delivery_timeout_ms: default_delivery_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
            evict_after_failures: None,
        }
    }
}

impl CoordinatorConfig {
    /// Get the delivery timeout as a Duration
    pub fn delivery_timeout(&self) -> Duration {
        debug!(delivery_timeout_ms = %self.delivery_timeout_ms, "CoordinatorConfig::delivery_timeout: called");
        Duration::from_millis(self.delivery_timeout_ms)
    }
}
