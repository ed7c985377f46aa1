//! Validation, repair and control for online dual-write migrations
//!
//! This crate sits on top of the connector and the event channel:
//! - Validator: batched base/target comparison publishing inconsistency events
//! - Fixer: re-reads the base and overwrites or deletes the target row
//! - FixConsumer: consumes inconsistency events and dispatches repairs by direction
//! - Scheduler / ControlPlane: pattern switching and validation job lifecycle
//! - Migration: one fully wired migration built from a `MigratorConfig`, and
//!   the `ControlPlane` an executor drives for it

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod fix_consumer;
pub mod fixer;
pub mod migration;
pub mod scheduler;
pub mod validator;

pub use config::{FixerConfig, MigratorConfig, ValidatorConfig, CONFIG_FILE_NAME};
pub use fix_consumer::{FixConsumer, FixStats, FixerStatus};
pub use fixer::{FixOutcome, Fixer};
pub use migration::{Migration, OFFSETS_FILE_NAME};
pub use scheduler::{
    ControlPlane, JobState, JobStatus, MigrationStatus, Scheduler, ValidationMode,
    ValidationParams, DEFAULT_INCREMENTAL_SLEEP_MS,
};
pub use validator::{ProgressSnapshot, ScanMode, ValidationProgress, Validator};
