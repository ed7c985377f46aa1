//! Migration configuration via `migrator.toml`
//!
//! One file configures a whole migration: the connector, the validator
//! defaults, the inconsistency topic and the repair consumer. Every field has
//! a default, so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use dualwrite_connpool::PoolConfig;
use dualwrite_core::{Error, Result};
use dualwrite_events::ConsumerOptions;
use serde::{Deserialize, Serialize};

/// Config file name placed next to the topic directory
pub const CONFIG_FILE_NAME: &str = "migrator.toml";

/// Validator defaults, overridable per job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Rows read per scan step
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause after the scan is exhausted. 0 ends the pass instead.
    #[serde(default)]
    pub sleep_interval_ms: u64,
    /// Deadline for each read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Deadline for each publish
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,
}

fn default_batch_size() -> usize {
    100
}

fn default_read_timeout_ms() -> u64 {
    1000
}

fn default_notify_timeout_ms() -> u64 {
    5000
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sleep_interval_ms: 0,
            read_timeout_ms: default_read_timeout_ms(),
            notify_timeout_ms: default_notify_timeout_ms(),
        }
    }
}

impl ValidatorConfig {
    /// `sleep_interval_ms` as a `Duration`
    pub fn sleep_interval(&self) -> Duration {
        Duration::from_millis(self.sleep_interval_ms)
    }

    /// `read_timeout_ms` as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// `notify_timeout_ms` as a `Duration`
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// Repair consumer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixerConfig {
    /// Deadline for each repair
    #[serde(default = "default_fix_timeout_ms")]
    pub timeout_ms: u64,
    /// How long one poll waits for new events
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Events taken per poll
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,
    /// Commit past an event whose repair failed
    #[serde(default = "default_commit_on_error")]
    pub commit_on_error: bool,
    /// Drop handled events from the topic once every group has committed
    /// past them
    #[serde(default = "default_release_handled")]
    pub release_handled: bool,
}

fn default_fix_timeout_ms() -> u64 {
    5000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_poll_records() -> usize {
    64
}

fn default_commit_on_error() -> bool {
    true
}

fn default_release_handled() -> bool {
    true
}

impl Default for FixerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fix_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_records: default_max_poll_records(),
            commit_on_error: default_commit_on_error(),
            release_handled: default_release_handled(),
        }
    }
}

impl FixerConfig {
    /// `timeout_ms` as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Consumer loop settings
    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            max_poll_records: self.max_poll_records,
            commit_on_error: self.commit_on_error,
            release_committed: self.release_handled,
        }
    }
}

/// Top-level configuration, parsed from `migrator.toml`.
///
/// # Example
///
/// ```toml
/// topic = "inconsistent_events"
/// consumer_group = "fix"
///
/// [validator]
/// batch_size = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigratorConfig {
    /// Topic inconsistency events are published to
    #[serde(default = "default_topic")]
    pub topic: String,
    /// Consumer group of the repair consumer
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    /// Topic partitions
    #[serde(default = "default_partitions")]
    pub partitions: u32,
    /// Dual-write connector
    #[serde(default)]
    pub pool: PoolConfig,
    /// Validator defaults
    #[serde(default)]
    pub validator: ValidatorConfig,
    /// Repair consumer
    #[serde(default)]
    pub fixer: FixerConfig,
}

fn default_topic() -> String {
    "inconsistent_events".to_string()
}

fn default_consumer_group() -> String {
    "fix".to_string()
}

fn default_partitions() -> u32 {
    4
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            consumer_group: default_consumer_group(),
            partitions: default_partitions(),
            pool: PoolConfig::default(),
            validator: ValidatorConfig::default(),
            fixer: FixerConfig::default(),
        }
    }
}

impl MigratorConfig {
    /// Default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Dual-write migration configuration

# Topic inconsistency events are published to, and the repair consumer group.
topic = "inconsistent_events"
consumer_group = "fix"
partitions = 4

[pool]
# Deadline for each best-effort call on the secondary store.
secondary_timeout_ms = 1000
# Compare reads against dst while src is authoritative.
shadow_reads = false
# Queued secondary writes beyond this are dropped.
mirror_queue_depth = 4096

[validator]
batch_size = 100
# 0 = one full pass; > 0 = keep polling for new updates forever.
sleep_interval_ms = 0
read_timeout_ms = 1000
notify_timeout_ms = 5000

[fixer]
timeout_ms = 5000
poll_interval_ms = 100
max_poll_records = 64
# Commit past an event whose repair failed instead of retrying it.
commit_on_error = true
# Drop handled events from memory and disk so the topic stays bounded.
release_handled = true
"#
    }

    /// Check values that have no sensible meaning.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.topic.is_empty() {
            return Err(Error::InvalidOperation("topic must not be empty".to_string()));
        }
        if self.consumer_group.is_empty() {
            return Err(Error::InvalidOperation(
                "consumer_group must not be empty".to_string(),
            ));
        }
        if self.partitions == 0 {
            return Err(Error::InvalidOperation(
                "partitions must be at least 1".to_string(),
            ));
        }
        if self.validator.batch_size == 0 {
            return Err(Error::InvalidOperation(
                "validator.batch_size must be at least 1".to_string(),
            ));
        }
        if self.fixer.max_poll_records == 0 {
            return Err(Error::InvalidOperation(
                "fixer.max_poll_records must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::StorageError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: MigratorConfig = toml::from_str(&content).map_err(|e| {
            Error::SerializationError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::StorageError(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::StorageError(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
