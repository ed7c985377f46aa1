//! # Dual-Write Executor
//!
//! The command interface to running migrations.
//!
//! An operator tool, admin endpoint or SDK drives migrations through
//! serializable [`Command`]s and receives [`Output`]s or [`Error`]s. The
//! [`Executor`] resolves the named migration and dispatches to its
//! [`ControlPlane`](dualwrite_migrator::ControlPlane).
//!
//! ## Quick Start
//!
//! ```text
//! use dualwrite_executor::{Command, Executor};
//!
//! let executor = Executor::new();
//! executor.register(migration.clone())?;
//!
//! executor.execute(Command::UpdatePattern {
//!     migration: "interactive".into(),
//!     pattern: "src_first".into(),
//! })?;
//!
//! let reply = executor.execute_json(r#"{"Status":{"migration":"interactive"}}"#);
//! ```
//!
//! ## Commands
//!
//! | Category | Commands |
//! |----------|----------|
//! | **System** | `Ping`, `ListMigrations` |
//! | **Pattern** | `GetPattern`, `UpdatePattern` |
//! | **Validation** | `StartValidation`, `StopValidation` |
//! | **Repair** | `StartFixer`, `StopFixer` |
//! | **Lifecycle** | `Status`, `Shutdown` |

#![warn(missing_docs)]

mod command;
mod convert;
mod error;
mod executor;
mod json;
mod output;

// Handler modules
mod handlers;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API - Everything users need is re-exported here
// =============================================================================

pub use command::Command;
pub use error::Error;
pub use executor::Executor;
pub use json::Response;
pub use output::Output;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, Error>;
