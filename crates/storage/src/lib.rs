//! Row-level store interface for dual-write migration
//!
//! This crate implements the store layer the connector and the validator sit on:
//! - RowStore / StoreTx: the pooled-connection and transaction interface
//! - Statement / Query / Row: row-level writes, reads and results
//! - MemoryStore: BTreeMap-based table with RwLock and overlay transactions
//! - testing::FaultyStore: fault and latency injection for any store

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod testing;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::{ExecResult, Query, Row, RowStore, Statement, StoreTx, TxOptions};
