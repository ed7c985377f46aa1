//! Dual-write connector
//!
//! This crate provides the connection-level proxy used during a live migration:
//! - DoubleWritePool: a `RowStore` fanning writes out to one or two stores by pattern
//! - DoubleWriteTx: a transaction with an authoritative and a best-effort leg
//! - Mirror: single-threaded FIFO worker for best-effort secondary calls
//! - PoolConfig: secondary deadline, shadow reads, queue depth

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod mirror;
pub mod pool;
pub mod tx;

pub use config::PoolConfig;
pub use mirror::{Mirror, MirrorStats};
pub use pool::{DoubleWritePool, PoolStats};
pub use tx::DoubleWriteTx;
