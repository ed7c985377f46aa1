//! Partitioned topics
//!
//! A topic is a fixed number of append-only partitions. A message's partition
//! is `key mod partitions`, so every report for one row id lands in the same
//! partition and is consumed in publish order.
//!
//! Topics are either purely in memory or backed by one [`RecordLog`] per
//! partition under a directory. A file-backed topic replays its logs on open,
//! so messages survive a restart. Offsets are message indexes within a
//! partition, starting at 0.
//!
//! Messages every consumer group has committed past can be released with
//! [`Topic::release`]. Released messages leave memory at once; a partition
//! log is rewritten without them once they make up most of the file.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dualwrite_core::{CancelToken, Error, OpContext, Result, Timestamp};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::encoding::Record;
use crate::log::{DurabilityMode, RecordLog};

/// Longest a waiting consumer sleeps before re-checking its cancel token
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Released records a partition log must hold before it is rewritten
pub const COMPACT_MIN_RECORDS: usize = 1024;

/// A message as delivered to consumers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Partition the message lives in
    pub partition: u32,
    /// Index within the partition
    pub offset: u64,
    /// Partitioning key
    pub key: i64,
    /// Publish time
    pub timestamp: Timestamp,
    /// Opaque payload
    pub payload: Vec<u8>,
}

struct Partition {
    /// Offset of `messages[0]`
    base: u64,
    messages: VecDeque<Message>,
    log: Option<RecordLog>,
    /// Records in the log file, released ones included
    log_records: usize,
}

impl Partition {
    fn empty(log: Option<RecordLog>) -> Self {
        Self {
            base: 0,
            messages: VecDeque::new(),
            log,
            log_records: 0,
        }
    }

    fn end_offset(&self) -> u64 {
        self.base + self.messages.len() as u64
    }

    /// Rewrite the log as a base marker plus the retained messages
    fn compact(&mut self) -> Result<()> {
        let Some(log) = &self.log else {
            return Ok(());
        };
        let mut records = Vec::with_capacity(self.messages.len() + 1);
        records.push(Record::PartitionBase { offset: self.base });
        records.extend(self.messages.iter().map(|m| Record::Message {
            key: m.key,
            timestamp: m.timestamp,
            value: m.payload.clone(),
        }));
        log.rewrite(&records)?;
        self.log_records = records.len();
        Ok(())
    }
}

/// Named, partitioned, append-only message topic
pub struct Topic {
    name: String,
    dir: Option<PathBuf>,
    partitions: Mutex<Vec<Partition>>,
    appended: Condvar,
}

impl Topic {
    /// Create a topic that lives only in memory
    pub fn in_memory(name: impl Into<String>, partitions: u32) -> Result<Self> {
        let partitions = Self::check_partitions(partitions)?;
        Ok(Self {
            name: name.into(),
            dir: None,
            partitions: Mutex::new((0..partitions).map(|_| Partition::empty(None)).collect()),
            appended: Condvar::new(),
        })
    }

    /// Open (or create) a file-backed topic under `dir/name/`
    ///
    /// Each partition is stored in `partition-{i}.log` and replayed on open.
    pub fn open<P: AsRef<Path>>(
        dir: P,
        name: impl Into<String>,
        partitions: u32,
        durability_mode: DurabilityMode,
    ) -> Result<Self> {
        let name = name.into();
        let partitions = Self::check_partitions(partitions)?;
        let root = dir.as_ref().join(&name);

        let mut loaded = Vec::with_capacity(partitions as usize);
        for index in 0..partitions {
            let log = RecordLog::open(
                root.join(format!("partition-{}.log", index)),
                durability_mode,
            )?;
            let records = log.read_all()?;
            let mut partition = Partition::empty(None);
            partition.log_records = records.len();
            for record in records {
                match record {
                    Record::PartitionBase { offset } => {
                        partition.base = offset;
                        partition.messages.clear();
                    }
                    Record::Message {
                        key,
                        timestamp,
                        value,
                    } => {
                        let offset = partition.end_offset();
                        partition.messages.push_back(Message {
                            partition: index,
                            offset,
                            key,
                            timestamp,
                            payload: value,
                        });
                    }
                    Record::OffsetCommit { .. } => {}
                }
            }
            partition.log = Some(log);
            loaded.push(partition);
        }

        let replayed: usize = loaded.iter().map(|p| p.messages.len()).sum();
        info!(topic = %name, partitions, replayed, "opened topic");

        Ok(Self {
            name,
            dir: Some(root),
            partitions: Mutex::new(loaded),
            appended: Condvar::new(),
        })
    }

    fn check_partitions(partitions: u32) -> Result<u32> {
        if partitions == 0 {
            return Err(Error::InvalidOperation(
                "topic needs at least one partition".to_string(),
            ));
        }
        Ok(partitions)
    }

    /// Topic name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding the partition logs, if file-backed
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Number of partitions
    pub fn partition_count(&self) -> u32 {
        self.partitions.lock().len() as u32
    }

    /// Partition a key maps to
    pub fn partition_for(&self, key: i64) -> u32 {
        key.rem_euclid(i64::from(self.partition_count())) as u32
    }

    /// Append a message, returning its partition and offset
    ///
    /// The message is durable (per the log's durability mode) before it
    /// becomes visible to consumers.
    pub fn append(&self, ctx: &OpContext, key: i64, payload: Vec<u8>) -> Result<(u32, u64)> {
        ctx.check()?;
        let partition = self.partition_for(key);
        let timestamp = Timestamp::now();

        let mut partitions = self.partitions.lock();
        let target = &mut partitions[partition as usize];
        if let Some(log) = &target.log {
            log.append(&Record::Message {
                key,
                timestamp,
                value: payload.clone(),
            })?;
            target.log_records += 1;
        }
        let offset = target.end_offset();
        target.messages.push_back(Message {
            partition,
            offset,
            key,
            timestamp,
            payload,
        });
        drop(partitions);

        self.appended.notify_all();
        Ok((partition, offset))
    }

    fn no_partition(&self, partition: u32) -> Error {
        Error::InvalidOperation(format!(
            "topic {} has no partition {}",
            self.name, partition
        ))
    }

    /// Read up to `max` messages from `partition` starting at `offset`
    ///
    /// Reading below the first retained offset starts at the first
    /// retained message.
    pub fn read(&self, partition: u32, offset: u64, max: usize) -> Result<Vec<Message>> {
        let partitions = self.partitions.lock();
        let source = partitions
            .get(partition as usize)
            .ok_or_else(|| self.no_partition(partition))?;
        let start = (offset.saturating_sub(source.base) as usize).min(source.messages.len());
        Ok(source.messages.iter().skip(start).take(max).cloned().collect())
    }

    /// Offset the next message appended to `partition` will get
    pub fn end_offset(&self, partition: u32) -> u64 {
        self.partitions
            .lock()
            .get(partition as usize)
            .map_or(0, Partition::end_offset)
    }

    /// Offset of the oldest message still held for `partition`
    pub fn start_offset(&self, partition: u32) -> u64 {
        self.partitions
            .lock()
            .get(partition as usize)
            .map_or(0, |p| p.base)
    }

    /// Messages held in memory across all partitions
    pub fn retained(&self) -> usize {
        self.partitions.lock().iter().map(|p| p.messages.len()).sum()
    }

    /// Drop every message of `partition` below `offset`
    ///
    /// Returns how many messages were dropped. The partition log is
    /// rewritten once released records reach [`COMPACT_MIN_RECORDS`] and
    /// outnumber the retained ones.
    pub fn release(&self, partition: u32, offset: u64) -> Result<usize> {
        let mut partitions = self.partitions.lock();
        let target = partitions
            .get_mut(partition as usize)
            .ok_or_else(|| self.no_partition(partition))?;

        let upto = offset.min(target.end_offset());
        let dropped = upto.saturating_sub(target.base) as usize;
        if dropped == 0 {
            return Ok(0);
        }
        target.messages.drain(..dropped);
        target.base = upto;

        let released = target.log_records.saturating_sub(target.messages.len());
        if target.log.is_some()
            && released >= COMPACT_MIN_RECORDS
            && released > target.messages.len()
        {
            target.compact()?;
            debug!(topic = %self.name, partition, base = target.base, released, "partition log compacted");
        }
        Ok(dropped)
    }

    /// Rewrite every partition log without its released messages
    pub fn compact(&self) -> Result<()> {
        for partition in self.partitions.lock().iter_mut() {
            if partition.log_records > partition.messages.len() + 1 {
                partition.compact()?;
            }
        }
        Ok(())
    }

    /// Block until any `(partition, position)` pair has messages at or past
    /// `position`, the timeout elapses, or `cancel` fires.
    ///
    /// Returns `true` if data is available.
    pub fn wait_for_data(
        &self,
        positions: &[(u32, u64)],
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        let mut partitions = self.partitions.lock();
        loop {
            let ready = positions.iter().any(|(partition, position)| {
                partitions
                    .get(*partition as usize)
                    .map_or(false, |p| p.end_offset() > *position)
            });
            if ready {
                return true;
            }
            if cancel.map_or(false, |c| c.is_cancelled()) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(WAIT_SLICE);
            self.appended.wait_for(&mut partitions, slice);
        }
    }

    /// Flush and fsync every partition log
    pub fn sync(&self) -> Result<()> {
        for partition in self.partitions.lock().iter() {
            if let Some(log) = &partition.log {
                log.fsync()?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish()
    }
}
