//! Command enum defining every control-plane operation.
//!
//! Commands are the instruction set an operator (or an admin HTTP/CLI front
//! end) uses to drive registered migrations. Commands are:
//! - **Self-contained**: All parameters needed for execution are in the variant
//! - **Serializable**: Can be converted to/from JSON
//! - **Pure data**: No closures or executable code

use dualwrite_migrator::{ValidationMode, ValidationParams};
use serde::{Deserialize, Serialize};

/// A command is a self-contained, serializable control operation.
///
/// # Command Categories
///
/// | Category | Count | Description |
/// |----------|-------|-------------|
/// | System | 2 | Liveness and discovery |
/// | Pattern | 2 | Read and switch the migration pattern |
/// | Validation | 2 | Start and stop validation jobs |
/// | Repair | 2 | Start and stop the repair consumer |
/// | Lifecycle | 2 | Status and shutdown |
///
/// # Example
///
/// ```
/// use dualwrite_executor::Command;
///
/// let cmd: Command = serde_json::from_str(
///     r#"{"UpdatePattern":{"migration":"interactive","pattern":"src_first"}}"#,
/// ).unwrap();
/// assert_eq!(
///     cmd,
///     Command::UpdatePattern {
///         migration: "interactive".into(),
///         pattern: "src_first".into(),
///     }
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub enum Command {
    // ==================== System (2) ====================
    /// Liveness check.
    /// Returns: `Output::Pong`
    Ping,

    /// Names of every registered migration, sorted.
    /// Returns: `Output::Migrations`
    ListMigrations,

    // ==================== Pattern (2) ====================
    /// Read the active pattern.
    /// Returns: `Output::Pattern`
    GetPattern {
        /// Migration name
        migration: String,
    },

    /// Switch pattern. Unknown names fail with `UnknownPattern` and leave
    /// the pattern unchanged.
    /// Returns: `Output::Pattern`
    UpdatePattern {
        /// Migration name
        migration: String,
        /// One of `src_only`, `src_first`, `dst_first`, `dst_only`
        pattern: String,
    },

    // ==================== Validation (2) ====================
    /// Start a validation job, replacing a running job of the same mode.
    /// Returns: `Output::Job`
    StartValidation {
        /// Migration name
        migration: String,
        /// `full` or `incremental`
        mode: ValidationMode,
        /// Overrides of the migration's validator config
        #[serde(default)]
        params: ValidationParams,
    },

    /// Stop the job of `mode`.
    /// Returns: `Output::Bool` (whether a job was running)
    StopValidation {
        /// Migration name
        migration: String,
        /// `full` or `incremental`
        mode: ValidationMode,
    },

    // ==================== Repair (2) ====================
    /// Start the repair consumer.
    /// Returns: `Output::Bool` (whether it was stopped before)
    StartFixer {
        /// Migration name
        migration: String,
    },

    /// Stop the repair consumer and wait for it.
    /// Returns: `Output::Bool` (whether it was running)
    StopFixer {
        /// Migration name
        migration: String,
    },

    // ==================== Lifecycle (2) ====================
    /// Pattern, jobs, connector and repair counters.
    /// Returns: `Output::Status`
    Status {
        /// Migration name
        migration: String,
    },

    /// Stop every job and the repair consumer of a migration, drain
    /// best-effort writes and sync the event channel.
    /// Returns: `Output::Unit`
    Shutdown {
        /// Migration name
        migration: String,
    },
}

impl Command {
    /// Migration the command targets, if any
    pub fn migration(&self) -> Option<&str> {
        match self {
            Command::Ping | Command::ListMigrations => None,
            Command::GetPattern { migration }
            | Command::UpdatePattern { migration, .. }
            | Command::StartValidation { migration, .. }
            | Command::StopValidation { migration, .. }
            | Command::StartFixer { migration }
            | Command::StopFixer { migration }
            | Command::Status { migration }
            | Command::Shutdown { migration } => Some(migration),
        }
    }

    /// Variant name, for logging
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "Ping",
            Command::ListMigrations => "ListMigrations",
            Command::GetPattern { .. } => "GetPattern",
            Command::UpdatePattern { .. } => "UpdatePattern",
            Command::StartValidation { .. } => "StartValidation",
            Command::StopValidation { .. } => "StopValidation",
            Command::StartFixer { .. } => "StartFixer",
            Command::StopFixer { .. } => "StopFixer",
            Command::Status { .. } => "Status",
            Command::Shutdown { .. } => "Shutdown",
        }
    }
}
