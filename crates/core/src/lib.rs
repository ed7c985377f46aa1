//! Core types and traits for dual-write migration
//!
//! This crate defines the foundational types used throughout the system:
//! - Entity: the `{id, compare_to}` contract every migratable row implements
//! - MigrationPattern / PatternCell: the four-valued phase and its atomic holder
//! - InconsistencyEvent: divergence reports (Direction, InconsistencyType)
//! - OpContext / CancelToken: deadlines and cooperative cancellation
//! - Timestamp: row update time used by incremental validation
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod entity;
pub mod error;
pub mod event;
pub mod pattern;
pub mod timestamp;

pub use context::{CancelToken, OpContext};
pub use entity::Entity;
pub use error::{Error, Result};
pub use event::{Direction, InconsistencyEvent, InconsistencyType};
pub use pattern::{MigrationPattern, PatternCell, Side};
pub use timestamp::Timestamp;
