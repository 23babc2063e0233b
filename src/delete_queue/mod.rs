//! Delete Queue Module
//!
//! Persistent log of "this key was deleted at this time", queried by
//! timestamp range so a lagging replica can learn which keys went away
//! since its last sync point.
//!
//! ## Responsibilities
//! - Root record codec (magic, primal offset, two buffer references)
//! - Offset index: monotonic (timestamp, offset) pairs
//! - Key log: length-prefixed keys
//! - `enqueue` / `range_query` under a single root block lock
//!
//! ## Layout
//! ```text
//!   root block                       offset index          key log
//! ┌──────┬────────┬─────┬─────┐    ┌──────────┬─────┐    ┌───┬───┬───┬───
//! │ DelQ │ primal │ idx │ log │──▶ │ (t0, o0) │ ... │    │ k │ k │ k │ ...
//! └──────┴────────┴─────┴─────┘    └──────────┴─────┘    └───┴───┴───┴───
//!                          │             │  o0 ──────────▶ ▲
//!                          └─────────────┼─────────────────┘
//! ```
//!
//! ## Locking
//! Both operations hold the root block lock for their whole duration:
//! write for `enqueue`, read for `range_query`. A reader therefore never
//! sees an index entry without its key bytes or the reverse.
//!
//! ## Known limitation
//! Neither buffer is ever trimmed, so both grow without bound. The
//! primal offset exists so trimming the key log front will not require
//! rewriting the index; it stays 0 until trimming exists.

mod key_log;
mod offset_index;
mod receiver;
mod root;

pub use key_log::encode_entry;
pub use offset_index::IndexEntry;
pub use receiver::{ChannelReceiver, CollectingReceiver, DeletionEvent, DeletionKeyStreamReceiver};
pub use root::{initialize_empty_delete_queue, key_log_ref_size, RootRecord, MAGIC, OFFSET_INDEX_REF_SIZE};

use crate::error::Result;
use crate::storage::{Access, BlockId, Transaction};
use crate::types::{ReplTimestamp, StoreKey};

/// Summary of a delete queue's contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub primal_offset: i64,
    pub index_entries: usize,
    pub key_log_bytes: u64,
    pub first_timestamp: Option<ReplTimestamp>,
    pub last_timestamp: Option<ReplTimestamp>,
}

/// Allocate a root block in `txn` and initialize an empty queue in it
pub fn create_delete_queue(txn: &Transaction<'_>) -> Result<BlockId> {
    let root_id = txn.allocate_block()?;
    let mut root = txn.acquire(root_id, Access::Write)?;
    initialize_empty_delete_queue(root.data_mut()?, txn.block_size())?;
    Ok(root_id)
}

/// Record that `key` was deleted at `timestamp`
///
/// Timestamps earlier than the last recorded one are clamped to it (with a
/// warning). Fails only on corruption or storage errors; the surrounding
/// transaction should then be dropped, which rolls back any partial write.
pub fn enqueue(
    txn: &Transaction<'_>,
    root_id: BlockId,
    timestamp: ReplTimestamp,
    key: &StoreKey,
) -> Result<()> {
    // Held until the transaction finishes: the index and the log change together.
    let mut root_guard = txn.acquire(root_id, Access::Write)?;
    let mut root = RootRecord::decode(root_guard.data())?;

    let next_key_offset = root.key_log_end();
    offset_index::record_timestamp(txn, &mut root.offset_index, timestamp, next_key_offset)?;
    key_log::append_key(txn, &mut root.key_log, key)?;

    root.encode_into(root_guard.data_mut()?)?;
    Ok(())
}

/// Stream every key deleted at a timestamp in `[begin, end)` to `receiver`
///
/// `receiver.complete()` is called exactly once on every path, including
/// failure; an error return means the delivered stream may be truncated.
/// Returns the number of keys delivered.
pub fn range_query<R>(
    txn: &Transaction<'_>,
    root_id: BlockId,
    begin: ReplTimestamp,
    end: ReplTimestamp,
    receiver: &mut R,
) -> Result<usize>
where
    R: DeletionKeyStreamReceiver + ?Sized,
{
    let outcome = dump_keys(txn, root_id, begin, end, receiver);
    receiver.complete();
    outcome
}

fn dump_keys<R>(
    txn: &Transaction<'_>,
    root_id: BlockId,
    begin: ReplTimestamp,
    end: ReplTimestamp,
    receiver: &mut R,
) -> Result<usize>
where
    R: DeletionKeyStreamReceiver + ?Sized,
{
    let root_guard = txn.acquire(root_id, Access::Read)?;
    let root = RootRecord::decode(root_guard.data())?;

    if !root.offset_index.is_allocated() || !root.key_log.is_allocated() {
        return Ok(0);
    }
    if end < begin {
        tracing::debug!("Reversed deletion range {}..{}; nothing to report", begin, end);
        return Ok(0);
    }

    let range = offset_index::lookup_range(
        txn,
        &root.offset_index,
        root.primal_offset,
        root.key_log.size,
        begin,
        end,
    )?;

    match range {
        Some(range) if !range.is_empty() => {
            key_log::stream_keys(txn, &root.key_log, range, receiver)
        }
        _ => Ok(0),
    }
}

/// Every offset index entry, oldest first
pub fn read_offset_index(txn: &Transaction<'_>, root_id: BlockId) -> Result<Vec<IndexEntry>> {
    let root_guard = txn.acquire(root_id, Access::Read)?;
    let root = RootRecord::decode(root_guard.data())?;
    offset_index::read_entries(txn, &root.offset_index)
}

/// Summarize a delete queue
pub fn inspect(txn: &Transaction<'_>, root_id: BlockId) -> Result<QueueStats> {
    let root_guard = txn.acquire(root_id, Access::Read)?;
    let root = RootRecord::decode(root_guard.data())?;
    let entries = offset_index::read_entries(txn, &root.offset_index)?;

    Ok(QueueStats {
        primal_offset: root.primal_offset,
        index_entries: entries.len(),
        key_log_bytes: root.key_log.size as u64,
        first_timestamp: entries.first().map(|e| e.timestamp),
        last_timestamp: entries.last().map(|e| e.timestamp),
    })
}
