//! Offset Index
//!
//! Append-only sequence of (timestamp, offset) pairs. Entry `(T, O)` says
//! the first key deleted at a timestamp ≥ T starts at absolute key log
//! offset O. Both columns strictly increase from entry to entry.
//!
//! ## Entry Format (12 bytes, packed, little-endian)
//! ```text
//! ┌───────────────┬────────────────┐
//! │ Timestamp (4) │ Offset (8)     │
//! └───────────────┴────────────────┘
//! ```

use std::ops::Range;

use bytes::{Buf, BufMut};

use crate::error::{DelQueueError, Result};
use crate::storage::{Access, LargeBufRef, SegmentedBuffer, Transaction};
use crate::types::ReplTimestamp;

use super::root::OFFSET_INDEX_REF_SIZE;

/// One (timestamp, offset) entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub timestamp: ReplTimestamp,
    pub offset: i64,
}

impl IndexEntry {
    /// Timestamp (4) + Offset (8), no padding
    pub const SIZE: usize = 12;

    pub fn new(timestamp: ReplTimestamp, offset: i64) -> Self {
        Self { timestamp, offset }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.timestamp.time);
        buf.put_i64_le(self.offset);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Self {
        let timestamp = ReplTimestamp::new(bytes.get_u32_le());
        let offset = bytes.get_i64_le();
        Self { timestamp, offset }
    }
}

/// Update the index for a deletion at `timestamp` whose key will start at
/// absolute key log offset `next_key_offset`.
///
/// Out-of-order timestamps are clamped to the last recorded one. Returns
/// the effective timestamp.
pub(crate) fn record_timestamp(
    txn: &Transaction<'_>,
    index_ref: &mut LargeBufRef,
    timestamp: ReplTimestamp,
    next_key_offset: i64,
) -> Result<ReplTimestamp> {
    check_entry_alignment(index_ref)?;

    let mut buf = SegmentedBuffer::new(txn, index_ref.clone(), OFFSET_INDEX_REF_SIZE, Access::Write)?;
    let entry_size = IndexEntry::SIZE as u64;

    if !buf.reference().is_allocated() {
        // The first deletion ever recorded
        let entry = IndexEntry::new(timestamp, next_key_offset);
        buf.allocate(entry_size)?;
        buf.write_at(0, &entry.encode())?;
        *index_ref = buf.into_reference();
        return Ok(timestamp);
    }

    let mut raw = [0u8; IndexEntry::SIZE];
    buf.read_at(buf.size() - entry_size, &mut raw)?;
    let last = IndexEntry::decode(&raw);

    let mut timestamp = timestamp;
    if last.timestamp.time > timestamp.time {
        tracing::warn!(
            "The delete queue is receiving updates out of order (t1 = {}, t2 = {}), or the system clock has been set back! Bringing up a replica may be excessively inefficient.",
            last.timestamp,
            timestamp
        );
        timestamp = last.timestamp;
    }

    if last.timestamp != timestamp {
        if next_key_offset <= last.offset {
            return Err(DelQueueError::Corruption(format!(
                "new index offset {} does not follow last offset {}",
                next_key_offset, last.offset
            )));
        }
        let entry = IndexEntry::new(timestamp, next_key_offset);
        buf.append(entry_size)?;
        buf.write_at(buf.size() - entry_size, &entry.encode())?;
    }

    // TODO: drop entries older than every replica's sync point once replicas report one.
    *index_ref = buf.into_reference();
    Ok(timestamp)
}

/// Translate `[begin, end)` in time into a key log byte range, relative to
/// `primal_offset`. `None` means no deletion is at or after `begin`.
pub(crate) fn lookup_range(
    txn: &Transaction<'_>,
    index_ref: &LargeBufRef,
    primal_offset: i64,
    key_log_size: i64,
    begin: ReplTimestamp,
    end: ReplTimestamp,
) -> Result<Option<Range<u64>>> {
    check_entry_alignment(index_ref)?;

    let buf = SegmentedBuffer::new(txn, index_ref.clone(), OFFSET_INDEX_REF_SIZE, Access::Read)?;
    let mut reader = buf.reader(0, buf.size())?;
    let mut raw = [0u8; IndexEntry::SIZE];

    let mut begin_offset = None;
    let mut end_offset = None;
    while !reader.is_exhausted() {
        reader.read_exact(&mut raw)?;
        let entry = IndexEntry::decode(&raw);

        if begin_offset.is_none() && begin.time <= entry.timestamp.time {
            begin_offset = Some(entry.offset - primal_offset);
        }
        if end.time <= entry.timestamp.time {
            if begin_offset.is_none() {
                return Err(DelQueueError::Corruption(format!(
                    "index entry at t={} ends the range before any entry begins it",
                    entry.timestamp
                )));
            }
            end_offset = Some(entry.offset - primal_offset);
            break;
        }
    }

    let Some(begin_offset) = begin_offset else {
        return Ok(None);
    };
    let end_offset = end_offset.unwrap_or(key_log_size);

    if begin_offset < 0 || begin_offset > end_offset || end_offset > key_log_size {
        return Err(DelQueueError::Corruption(format!(
            "index resolved key log range {}..{} outside 0..{}",
            begin_offset, end_offset, key_log_size
        )));
    }

    Ok(Some(begin_offset as u64..end_offset as u64))
}

/// Decode every entry, in order
pub(crate) fn read_entries(txn: &Transaction<'_>, index_ref: &LargeBufRef) -> Result<Vec<IndexEntry>> {
    check_entry_alignment(index_ref)?;
    if !index_ref.is_allocated() {
        return Ok(Vec::new());
    }

    let buf = SegmentedBuffer::new(txn, index_ref.clone(), OFFSET_INDEX_REF_SIZE, Access::Read)?;
    let mut reader = buf.reader(0, buf.size())?;
    let mut raw = [0u8; IndexEntry::SIZE];
    let mut entries = Vec::with_capacity(buf.size() as usize / IndexEntry::SIZE);
    while !reader.is_exhausted() {
        reader.read_exact(&mut raw)?;
        entries.push(IndexEntry::decode(&raw));
    }
    Ok(entries)
}

fn check_entry_alignment(index_ref: &LargeBufRef) -> Result<()> {
    if index_ref.size % IndexEntry::SIZE as i64 != 0 {
        return Err(DelQueueError::Corruption(format!(
            "offset index size {} is not a multiple of {}",
            index_ref.size,
            IndexEntry::SIZE
        )));
    }
    Ok(())
}
