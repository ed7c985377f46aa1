//! Error types for command execution.
//!
//! All errors from command execution are represented by the [`Error`] enum.
//! These errors are:
//! - **Structured**: Each variant has typed fields for error details
//! - **Serializable**: Can be converted to/from JSON
//! - **Lossless**: The internal error's message is carried in the variant

use serde::{Deserialize, Serialize};

/// Command execution errors.
///
/// # Categories
///
/// | Category | Variants | Description |
/// |----------|----------|-------------|
/// | Not Found | `MigrationNotFound` | No migration registered under the name |
/// | Validation | `UnknownPattern`, `InvalidInput` | Bad input |
/// | Concurrency | `Conflict` | Duplicate registration, cancellation, timeouts |
/// | System | `Io`, `Serialization`, `Internal` | Infrastructure errors |
///
/// # Example
///
/// ```ignore
/// use dualwrite_executor::{Command, Error, Executor};
///
/// match executor.execute(cmd) {
///     Ok(output) => { /* handle success */ }
///     Err(Error::MigrationNotFound { migration }) => {
///         println!("no migration named '{}'", migration);
///     }
///     Err(e) => {
///         println!("Error: {}", e);
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    // ==================== Not Found ====================
    /// No migration registered under this name
    #[error("migration not found: {migration}")]
    MigrationNotFound {
        /// Requested name
        migration: String,
    },

    // ==================== Validation Errors ====================
    /// Pattern name is not one of the four legal values
    #[error("unknown migration pattern: {pattern}")]
    UnknownPattern {
        /// Rejected name
        pattern: String,
    },

    /// Invalid input
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// What was wrong
        reason: String,
    },

    // ==================== Concurrency Errors ====================
    /// Generic conflict
    #[error("conflict: {reason}")]
    Conflict {
        /// What conflicted
        reason: String,
    },

    // ==================== System Errors ====================
    /// I/O error
    #[error("I/O error: {reason}")]
    Io {
        /// Underlying error
        reason: String,
    },

    /// Serialization error
    #[error("serialization error: {reason}")]
    Serialization {
        /// Underlying error
        reason: String,
    },

    /// Internal error (store failure, corruption, or invariant violation)
    #[error("internal error: {reason}")]
    Internal {
        /// Underlying error
        reason: String,
    },
}
