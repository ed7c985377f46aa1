//! Error types for the dual-write migration subsystem
//!
//! This module defines the single error type shared by every crate in the
//! workspace. We use `thiserror` for automatic `Display` and `Error` trait
//! implementations.

use std::io;
use thiserror::Error;

/// Result type alias for migration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the migration subsystem
#[derive(Debug, Error)]
pub enum Error {
    /// Pattern string is not one of the four legal migration patterns
    #[error("unknown migration pattern: {0}")]
    UnknownPattern(String),

    /// Direction string is neither `SRC` nor `DST`
    #[error("unknown validation direction: {0}")]
    UnknownDirection(String),

    /// Inconsistency type string is not recognised
    #[error("unknown inconsistency type: {0}")]
    UnknownEventType(String),

    /// The caller's cancellation token fired
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed before it completed
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Insert of a row whose primary key already exists
    #[error("duplicate key: {id}")]
    DuplicateKey {
        /// Conflicting row id
        id: i64,
    },

    /// Statement issued on a transaction that was already committed or rolled back
    #[error("transaction already closed")]
    TransactionClosed,

    /// The store refused or could not serve the request
    #[error("store {store} unavailable: {reason}")]
    Unavailable {
        /// Name of the store
        store: String,
        /// What went wrong
        reason: String,
    },

    /// Storage layer error
    #[error("storage error: {0}")]
    StorageError(String),

    /// I/O error (file operations)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Data corruption detected in a record log
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Buffer ends in the middle of a record (torn write at the tail)
    #[error("incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    IncompleteEntry {
        /// Byte offset of the record
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Invalid operation or state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A bounded queue is full
    #[error("queue full: {0}")]
    Backpressure(String),
}

impl Error {
    /// True for `Cancelled` and `DeadlineExceeded`.
    ///
    /// Scan loops treat these as a clean stop rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Shorthand for an `Unavailable` error on a named store.
    pub fn unavailable(store: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Unavailable {
            store: store.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
