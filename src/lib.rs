//! Dualwrite - online migration of a table between two row stores
//!
//! Business code keeps reading and writing through a dual-write connector
//! while an operator walks the migration through four patterns:
//! `src_only` → `src_first` → `dst_first` → `dst_only`. Validation jobs
//! compare the stores and publish every divergence to an inconsistency
//! topic; a repair consumer overwrites the target with the base's state.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dualwrite::{Command, Executor, MemoryStore, Migration, MigratorConfig};
//!
//! let migration = Arc::new(Migration::in_memory("interactive", src, dst, MigratorConfig::default())?);
//! migration.start_fixer()?;
//!
//! let executor = Executor::new();
//! executor.register(migration.clone())?;
//! executor.execute(Command::UpdatePattern {
//!     migration: "interactive".into(),
//!     pattern: "src_first".into(),
//! })?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `dualwrite-core` | Entity contract, patterns, events, contexts, errors |
//! | `dualwrite-storage` | Row store interface and the in-memory store |
//! | `dualwrite-connpool` | Dual-write connector |
//! | `dualwrite-events` | Partitioned inconsistency topic and consumer groups |
//! | `dualwrite-migrator` | Validator, fixer, scheduler and migration wiring |
//! | `dualwrite-executor` | Serializable command interface |

// Command interface
pub use dualwrite_executor::*;

// Migration wiring and control plane
pub use dualwrite_migrator::{
    ControlPlane, FixStats, FixerConfig, FixerStatus, JobState, JobStatus, Migration, MigrationStatus,
    MigratorConfig, ValidationMode, ValidationParams, ValidatorConfig,
};

// Connector
pub use dualwrite_connpool::{DoubleWritePool, DoubleWriteTx, PoolConfig, PoolStats};

// Domain types
pub use dualwrite_core::{
    CancelToken, Direction, Entity, InconsistencyEvent, InconsistencyType, MigrationPattern,
    OpContext, Timestamp,
};

// Stores
pub use dualwrite_storage::{MemoryStore, Query, RowStore, Statement, StoreTx, TxOptions};
