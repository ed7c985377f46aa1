//! Error conversion from internal error types.
//!
//! This module maps the core crate's errors onto the executor's
//! serializable [`Error`], keeping each message.

use dualwrite_core::Error as CoreError;

use crate::Error;

impl From<CoreError> for Error {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnknownPattern(pattern) => Error::UnknownPattern { pattern },

            // Bad input
            CoreError::UnknownDirection(_)
            | CoreError::UnknownEventType(_)
            | CoreError::InvalidOperation(_) => Error::InvalidInput {
                reason: err.to_string(),
            },

            // Conflict errors (temporal failures)
            CoreError::Cancelled
            | CoreError::DeadlineExceeded
            | CoreError::DuplicateKey { .. }
            | CoreError::TransactionClosed
            | CoreError::Backpressure(_) => Error::Conflict {
                reason: err.to_string(),
            },

            CoreError::IoError(e) => Error::Io {
                reason: e.to_string(),
            },

            CoreError::SerializationError(reason) => Error::Serialization { reason },

            CoreError::Unavailable { .. }
            | CoreError::StorageError(_)
            | CoreError::Corruption(_)
            | CoreError::IncompleteEntry { .. } => Error::Internal {
                reason: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization {
            reason: err.to_string(),
        }
    }
}
