//! Testing utilities for stores and the layers above them
//!
//! - **FaultyStore**: wraps any [`RowStore`](crate::RowStore) and injects
//!   failures or latency at chosen fault points
//! - **Interaction**: a small entity used by tests across the workspace
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use dualwrite_core::OpContext;
//! use dualwrite_storage::testing::{FaultPoint, FaultyStore, Interaction};
//! use dualwrite_storage::{MemoryStore, RowStore};
//!
//! let store = FaultyStore::new(Arc::new(MemoryStore::<Interaction>::new("dst")));
//! store.fail_times(FaultPoint::QueryRow, 1);
//! assert!(store.query_row(&OpContext::background(), 1).is_err());
//! assert!(store.query_row(&OpContext::background(), 1).is_ok());
//! ```

mod fault;
mod fixtures;

pub use fault::{FaultPoint, FaultyStore};
pub use fixtures::Interaction;
