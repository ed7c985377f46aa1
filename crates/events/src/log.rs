//! Append-only record log
//!
//! One file per partition (and one per offset store). Records are framed by
//! [`encoding`](crate::encoding); the log adds buffered appends, fsync policy
//! and a tolerant reader that stops at a torn tail.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dualwrite_core::{Error, Result};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::encoding::{decode_record, encode_record, Record};

/// Durability mode configuration
///
/// Controls when fsync is called to ensure records reach disk.
///
/// - `Strict` - fsync after every append
/// - `Batched` - fsync every N appends or every T milliseconds (DEFAULT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every append (slow, maximum durability)
    Strict,

    /// fsync every N appends OR every T milliseconds
    ///
    /// May lose up to batch_size records or interval_ms of data on crash.
    Batched {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Batched {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

struct WriterState {
    writer: BufWriter<File>,
    last_fsync: Instant,
    writes_since_fsync: usize,
}

/// Append-only file of CRC-framed records
pub struct RecordLog {
    path: PathBuf,
    state: Mutex<WriterState>,
    current_offset: AtomicU64,
    durability_mode: DurabilityMode,
    truncated: Option<TruncateInfo>,
}

/// A torn or corrupted tail cut off when a log was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncateInfo {
    /// Position where valid data ends
    pub valid_end: u64,
    /// File size before truncation
    pub original_size: u64,
}

impl TruncateInfo {
    /// Number of bytes removed from the end of the file
    pub fn bytes_to_truncate(&self) -> u64 {
        self.original_size - self.valid_end
    }
}

/// Decode records from the front of `buf`, stopping at the first torn or
/// corrupted one. Returns the records and the end of the last good one.
fn scan(buf: &[u8], path: &Path) -> (Vec<Record>, u64) {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < buf.len() {
        match decode_record(&buf[pos..], pos as u64) {
            Ok((record, consumed)) => {
                records.push(record);
                pos += consumed;
            }
            Err(Error::IncompleteEntry { .. }) => break,
            Err(e) => {
                warn!(path = %path.display(), offset = pos, error = %e, "record log corrupted");
                break;
            }
        }
    }
    (records, pos as u64)
}

impl RecordLog {
    /// Open an existing log or create a new one
    ///
    /// Creates parent directories if they don't exist. A torn or corrupted
    /// tail is cut off before the first append so new records follow the
    /// last good one.
    pub fn open<P: AsRef<Path>>(path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let (_, valid_end) = scan(&buf, &path);
        let original_size = buf.len() as u64;

        let truncated = if valid_end < original_size {
            let info = TruncateInfo {
                valid_end,
                original_size,
            };
            file.set_len(valid_end)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                valid_end,
                bytes = info.bytes_to_truncate(),
                "truncated record log tail"
            );
            Some(info)
        } else {
            None
        };

        Ok(Self {
            path,
            state: Mutex::new(WriterState {
                writer: BufWriter::new(file),
                last_fsync: Instant::now(),
                writes_since_fsync: 0,
            }),
            current_offset: AtomicU64::new(valid_end),
            durability_mode,
            truncated,
        })
    }

    /// Tail removed when the log was opened, if any
    pub fn truncate_info(&self) -> Option<TruncateInfo> {
        self.truncated
    }

    /// Append a record, returning the byte offset it was written at
    pub fn append(&self, record: &Record) -> Result<u64> {
        let encoded = encode_record(record)?;

        let mut state = self.state.lock();
        let offset = self.current_offset.load(Ordering::SeqCst);
        state.writer.write_all(&encoded).map_err(|e| {
            Error::StorageError(format!("failed to write record at offset {}: {}", offset, e))
        })?;
        self.current_offset
            .fetch_add(encoded.len() as u64, Ordering::SeqCst);

        match self.durability_mode {
            DurabilityMode::Strict => Self::sync(&mut state)?,
            DurabilityMode::Batched {
                interval_ms,
                batch_size,
            } => {
                state.writes_since_fsync += 1;
                let elapsed = state.last_fsync.elapsed().as_millis() as u64;
                if elapsed >= interval_ms || state.writes_since_fsync >= batch_size {
                    Self::sync(&mut state)?;
                } else {
                    // Keep appended records visible to readers of the file
                    state
                        .writer
                        .flush()
                        .map_err(|e| Error::StorageError(format!("failed to flush: {}", e)))?;
                }
            }
        }

        Ok(offset)
    }

    fn sync(state: &mut WriterState) -> Result<()> {
        state
            .writer
            .flush()
            .map_err(|e| Error::StorageError(format!("failed to flush: {}", e)))?;
        state
            .writer
            .get_mut()
            .sync_all()
            .map_err(|e| Error::StorageError(format!("failed to fsync: {}", e)))?;
        state.writes_since_fsync = 0;
        state.last_fsync = Instant::now();
        Ok(())
    }

    /// Flush buffered writes to OS buffers
    pub fn flush(&self) -> Result<()> {
        self.state
            .lock()
            .writer
            .flush()
            .map_err(|e| Error::StorageError(format!("failed to flush record log: {}", e)))
    }

    /// Force sync to disk (flush + fsync)
    pub fn fsync(&self) -> Result<()> {
        Self::sync(&mut self.state.lock())
    }

    /// Read every record from the start of the file
    ///
    /// A torn record at the end of the file (partial write before a crash)
    /// is ignored. Corruption stops the read at the last good record and
    /// is logged.
    pub fn read_all(&self) -> Result<Vec<Record>> {
        self.flush()?;

        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(scan(&buf, &self.path).0)
    }

    /// Replace the whole log with `records`
    ///
    /// The records are written to a temp file which is synced and renamed
    /// over the log, so a crash leaves either the old or the new contents.
    pub fn rewrite(&self, records: &[Record]) -> Result<()> {
        let mut state = self.state.lock();
        state
            .writer
            .flush()
            .map_err(|e| Error::StorageError(format!("failed to flush: {}", e)))?;

        let temp_path = self.path.with_extension("log.tmp");
        let mut size = 0u64;
        {
            let mut temp = BufWriter::new(File::create(&temp_path)?);
            for record in records {
                let encoded = encode_record(record)?;
                temp.write_all(&encoded)?;
                size += encoded.len() as u64;
            }
            temp.flush()?;
            temp.get_ref().sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        let file = OpenOptions::new()
            .append(true)
            .read(true)
            .open(&self.path)?;
        state.writer = BufWriter::new(file);
        state.writes_since_fsync = 0;
        state.last_fsync = Instant::now();
        self.current_offset.store(size, Ordering::SeqCst);

        debug!(path = %self.path.display(), records = records.len(), size, "record log rewritten");
        Ok(())
    }

    /// Current file size (offset for next append)
    pub fn size(&self) -> u64 {
        self.current_offset.load(Ordering::SeqCst)
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durability mode
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

impl Drop for RecordLog {
    fn drop(&mut self) {
        let _ = Self::sync(self.state.get_mut());
    }
}
