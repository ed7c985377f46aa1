//! Output enum for command execution results.
//!
//! Every command produces exactly one output type. The mapping is fixed: the
//! same command always produces the same output variant.

use dualwrite_core::MigrationPattern;
use dualwrite_migrator::{JobStatus, MigrationStatus};
use serde::{Deserialize, Serialize};

/// Successful command execution results.
///
/// Each [`Command`](crate::Command) variant maps to exactly one `Output`
/// variant, documented on the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Output {
    /// No return value
    Unit,

    /// Ping response
    Pong {
        /// Executor crate version
        version: String,
    },

    /// Boolean result
    Bool(bool),

    /// Registered migration names
    Migrations(Vec<String>),

    /// Active pattern
    Pattern(MigrationPattern),

    /// State of a job just started
    Job(JobStatus),

    /// Whole-migration snapshot
    Status(MigrationStatus),
}
