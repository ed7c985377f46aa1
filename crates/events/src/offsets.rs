//! Committed consumer offsets
//!
//! An `OffsetStore` remembers, per consumer group and partition, the next
//! offset the group will read. A file-backed store appends every commit to
//! a record log; on reopen the latest commit per `(group, partition)` wins.
//! The log is rewritten down to those latest commits on open and whenever
//! superseded commits pile up.

use std::collections::HashMap;
use std::path::Path;

use dualwrite_core::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::encoding::Record;
use crate::log::{DurabilityMode, RecordLog};

/// Superseded commits a log may hold before it is rewritten
pub const COMPACT_MIN_COMMITS: usize = 1024;

struct Committed {
    offsets: HashMap<(String, u32), u64>,
    /// Records in the log file, superseded ones included
    log_records: usize,
}

/// Per-group committed offsets
pub struct OffsetStore {
    committed: Mutex<Committed>,
    log: Option<RecordLog>,
}

impl OffsetStore {
    /// Offsets kept only in memory
    pub fn in_memory() -> Self {
        Self {
            committed: Mutex::new(Committed {
                offsets: HashMap::new(),
                log_records: 0,
            }),
            log: None,
        }
    }

    /// Open (or create) a commit log at `path` and replay it
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let log = RecordLog::open(path, durability_mode)?;
        let records = log.read_all()?;
        let mut committed = Committed {
            offsets: HashMap::new(),
            log_records: records.len(),
        };
        for record in records {
            if let Record::OffsetCommit {
                group,
                partition,
                offset,
            } = record
            {
                committed.offsets.insert((group, partition), offset);
            }
        }
        if committed.log_records > committed.offsets.len() {
            Self::rewrite(&log, &mut committed)?;
        }
        Ok(Self {
            committed: Mutex::new(committed),
            log: Some(log),
        })
    }

    fn rewrite(log: &RecordLog, committed: &mut Committed) -> Result<()> {
        let mut entries: Vec<(&(String, u32), &u64)> = committed.offsets.iter().collect();
        entries.sort();
        let latest: Vec<Record> = entries
            .into_iter()
            .map(|((group, partition), offset)| Record::OffsetCommit {
                group: group.clone(),
                partition: *partition,
                offset: *offset,
            })
            .collect();
        log.rewrite(&latest)?;
        debug!(
            path = %log.path().display(),
            dropped = committed.log_records - latest.len(),
            "offset log compacted"
        );
        committed.log_records = latest.len();
        Ok(())
    }

    /// Record that `group` will next read `offset` from `partition`
    pub fn commit(&self, group: &str, partition: u32, offset: u64) -> Result<()> {
        let mut committed = self.committed.lock();
        if let Some(log) = &self.log {
            log.append(&Record::OffsetCommit {
                group: group.to_string(),
                partition,
                offset,
            })?;
            committed.log_records += 1;
        }
        committed
            .offsets
            .insert((group.to_string(), partition), offset);

        if let Some(log) = &self.log {
            let superseded = committed.log_records - committed.offsets.len();
            if superseded >= COMPACT_MIN_COMMITS {
                Self::rewrite(log, &mut committed)?;
            }
        }
        Ok(())
    }

    /// Next offset `group` will read from `partition`, if it ever committed
    pub fn committed(&self, group: &str, partition: u32) -> Option<u64> {
        self.committed
            .lock()
            .offsets
            .get(&(group.to_string(), partition))
            .copied()
    }

    /// Lowest offset any group committed for `partition`
    ///
    /// Every group that committed on the partition has handled the messages
    /// below this offset.
    pub fn min_committed(&self, partition: u32) -> Option<u64> {
        self.committed
            .lock()
            .offsets
            .iter()
            .filter(|((_, p), _)| *p == partition)
            .map(|(_, offset)| *offset)
            .min()
    }

    /// Records in the commit log, or 0 for an in-memory store
    pub fn log_records(&self) -> usize {
        self.committed.lock().log_records
    }
}

impl Default for OffsetStore {
    fn default() -> Self {
        Self::in_memory()
    }
}
