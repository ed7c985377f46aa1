//! Record encoding and decoding
//!
//! Every record written to a partition log or an offset commit log uses the
//! same self-describing frame with a CRC32 checksum for corruption detection.
//!
//! ## Record Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: Total size of type + payload + crc (NOT including length itself)
//! - **type**: Record type tag (1=Message, 2=OffsetCommit, 3=PartitionBase)
//! - **payload**: fixed little-endian fields, see below
//! - **crc32**: CRC32 checksum over \[type\]\[payload\]
//!
//! Message payload: `[key: i64][timestamp: u64][value: bytes]`
//!
//! OffsetCommit payload: `[partition: u32][offset: u64][group: utf8 bytes]`
//!
//! PartitionBase payload: `[offset: u64]`. Written first when a partition
//! log is rewritten without its consumed prefix; the next message in the
//! file has this offset.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher;
use dualwrite_core::{Error, Result, Timestamp};
use std::io::{Cursor, Read};

/// Record type tag for a published message
pub const TYPE_MESSAGE: u8 = 1;
/// Record type tag for a consumer group offset commit
pub const TYPE_OFFSET_COMMIT: u8 = 2;
/// Record type tag for the first offset kept in a rewritten partition log
pub const TYPE_PARTITION_BASE: u8 = 3;

/// Frame overhead: length(4) + type(1) + crc(4)
const FRAME_OVERHEAD: usize = 9;

/// A decoded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A message appended to a partition
    Message {
        /// Partitioning key (the row id for inconsistency events)
        key: i64,
        /// Publish time
        timestamp: Timestamp,
        /// Opaque payload
        value: Vec<u8>,
    },
    /// A consumer group's next offset for one partition
    OffsetCommit {
        /// Consumer group name
        group: String,
        /// Partition index
        partition: u32,
        /// Next offset the group will read
        offset: u64,
    },
    /// Offset of the next message in a rewritten partition log
    PartitionBase {
        /// Offset of the first retained message
        offset: u64,
    },
}

impl Record {
    fn type_tag(&self) -> u8 {
        match self {
            Record::Message { .. } => TYPE_MESSAGE,
            Record::OffsetCommit { .. } => TYPE_OFFSET_COMMIT,
            Record::PartitionBase { .. } => TYPE_PARTITION_BASE,
        }
    }
}

/// Encode a record to bytes
///
/// Format: `[length: u32][type: u8][payload: bytes][crc32: u32]`
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let type_tag = record.type_tag();

    let mut payload = Vec::new();
    match record {
        Record::Message {
            key,
            timestamp,
            value,
        } => {
            payload.write_i64::<LittleEndian>(*key)?;
            payload.write_u64::<LittleEndian>(timestamp.as_micros())?;
            payload.extend_from_slice(value);
        }
        Record::OffsetCommit {
            group,
            partition,
            offset,
        } => {
            payload.write_u32::<LittleEndian>(*partition)?;
            payload.write_u64::<LittleEndian>(*offset)?;
            payload.extend_from_slice(group.as_bytes());
        }
        Record::PartitionBase { offset } => {
            payload.write_u64::<LittleEndian>(*offset)?;
        }
    }

    // type(1) + payload + crc(4)
    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.write_u32::<LittleEndian>(total_len as u32)?;
    buf.push(type_tag);
    buf.extend_from_slice(&payload);

    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(&payload);
    buf.write_u32::<LittleEndian>(hasher.finalize())?;

    Ok(buf)
}

/// Decode one record from the front of `buf` with CRC validation
///
/// Returns the record and the number of bytes consumed. `offset` is the
/// file offset of `buf[0]` and only appears in errors.
///
/// # Errors
///
/// - `IncompleteEntry` when `buf` ends inside the record (torn tail)
/// - `Corruption` on a bad length, CRC mismatch, unknown type or bad payload
pub fn decode_record(buf: &[u8], offset: u64) -> Result<(Record, usize)> {
    let mut cursor = Cursor::new(buf);

    let total_len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4,
        })? as usize;

    // Minimum valid record: type(1) + crc(4)
    if total_len < FRAME_OVERHEAD - 4 {
        return Err(Error::Corruption(format!(
            "offset {}: invalid record length {} (minimum is 5 bytes)",
            offset, total_len
        )));
    }

    if buf.len() < 4 + total_len {
        return Err(Error::IncompleteEntry {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let type_tag = cursor
        .read_u8()
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read type tag", offset)))?;

    let mut payload = vec![0u8; total_len - 5];
    cursor
        .read_exact(&mut payload)
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read payload", offset)))?;

    let expected_crc = cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| Error::Corruption(format!("offset {}: failed to read CRC", offset)))?;

    let mut hasher = Hasher::new();
    hasher.update(&[type_tag]);
    hasher.update(&payload);
    let actual_crc = hasher.finalize();

    if actual_crc != expected_crc {
        return Err(Error::Corruption(format!(
            "offset {}: CRC mismatch: expected {:08x}, got {:08x}",
            offset, expected_crc, actual_crc
        )));
    }

    let record = decode_payload(type_tag, &payload)
        .map_err(|e| Error::Corruption(format!("offset {}: {}", offset, e)))?;

    Ok((record, 4 + total_len))
}

fn decode_payload(type_tag: u8, payload: &[u8]) -> std::result::Result<Record, String> {
    let mut cursor = Cursor::new(payload);
    match type_tag {
        TYPE_MESSAGE => {
            let key = cursor
                .read_i64::<LittleEndian>()
                .map_err(|e| format!("message key: {}", e))?;
            let micros = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| format!("message timestamp: {}", e))?;
            let value = payload[cursor.position() as usize..].to_vec();
            Ok(Record::Message {
                key,
                timestamp: Timestamp::from_micros(micros),
                value,
            })
        }
        TYPE_OFFSET_COMMIT => {
            let partition = cursor
                .read_u32::<LittleEndian>()
                .map_err(|e| format!("commit partition: {}", e))?;
            let offset = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| format!("commit offset: {}", e))?;
            let group = String::from_utf8(payload[cursor.position() as usize..].to_vec())
                .map_err(|e| format!("commit group: {}", e))?;
            Ok(Record::OffsetCommit {
                group,
                partition,
                offset,
            })
        }
        TYPE_PARTITION_BASE => {
            let offset = cursor
                .read_u64::<LittleEndian>()
                .map_err(|e| format!("partition base: {}", e))?;
            Ok(Record::PartitionBase { offset })
        }
        other => Err(format!("unknown record type {}", other)),
    }
}
