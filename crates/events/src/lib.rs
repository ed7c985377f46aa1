//! Inconsistency event channel
//!
//! This crate implements the at-least-once, partitioned channel carrying
//! inconsistency reports from the validator to the fixer:
//! - encoding: CRC32-framed records
//! - RecordLog: append-only file with Strict / Batched durability, torn
//!   tail truncation on open, atomic rewrite
//! - Topic: partitioned by key, in memory or replayed from disk, with
//!   release of consumed messages
//! - OffsetStore: committed offsets per consumer group, compacted
//! - Producer / TopicProducer: JSON publishing of `InconsistencyEvent`
//! - ConsumerGroup / Handler: polling, commit and redelivery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consumer;
pub mod encoding;
pub mod handler;
pub mod log;
pub mod offsets;
pub mod producer;
pub mod topic;

pub use consumer::{ConsumerGroup, ConsumerOptions};
pub use encoding::{decode_record, encode_record, Record};
pub use handler::{Handler, JsonHandler};
pub use log::{DurabilityMode, RecordLog, TruncateInfo};
pub use offsets::OffsetStore;
pub use producer::{Producer, TopicProducer};
pub use topic::{Message, Topic};
