//! Connector settings
//!
//! Loaded as the `[pool]` section of the migrator's TOML file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for a [`DoubleWritePool`](crate::DoubleWritePool).
///
/// # Example
///
/// ```toml
/// [pool]
/// secondary_timeout_ms = 1000
/// shadow_reads = false
/// mirror_queue_depth = 4096
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Deadline for each best-effort call on the secondary store.
    #[serde(default = "default_secondary_timeout_ms")]
    pub secondary_timeout_ms: u64,
    /// Compare reads against the destination while the source is authoritative.
    #[serde(default)]
    pub shadow_reads: bool,
    /// Maximum queued secondary jobs before new ones are dropped.
    #[serde(default = "default_mirror_queue_depth")]
    pub mirror_queue_depth: usize,
}

fn default_secondary_timeout_ms() -> u64 {
    1000
}

fn default_mirror_queue_depth() -> usize {
    4096
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            secondary_timeout_ms: default_secondary_timeout_ms(),
            shadow_reads: false,
            mirror_queue_depth: default_mirror_queue_depth(),
        }
    }
}

impl PoolConfig {
    /// `secondary_timeout_ms` as a `Duration`
    pub fn secondary_timeout(&self) -> Duration {
        Duration::from_millis(self.secondary_timeout_ms)
    }

    /// Enable shadow reads
    pub fn with_shadow_reads(mut self, enabled: bool) -> Self {
        self.shadow_reads = enabled;
        self
    }

    /// Set the secondary deadline
    pub fn with_secondary_timeout(mut self, timeout: Duration) -> Self {
        self.secondary_timeout_ms = timeout.as_millis() as u64;
        self
    }
}
