//! Key Log
//!
//! Append-only sequence of length-prefixed keys. Entries carry no other
//! framing, so the log can only be walked forward from an offset the
//! offset index vouches for.
//!
//! ```text
//! ┌─────────┬──────────────┬─────────┬──────────────┬─────
//! │ Len (1) │ Key (Len)    │ Len (1) │ Key (Len)    │ ...
//! └─────────┴──────────────┴─────────┴──────────────┴─────
//! ```

use std::ops::Range;

use crate::error::{DelQueueError, Result};
use crate::storage::{Access, LargeBufRef, SegmentedBuffer, Transaction};
use crate::types::StoreKey;

use super::receiver::DeletionKeyStreamReceiver;
use super::root::key_log_ref_size;

/// Length-prefixed encoding of a key
pub fn encode_entry(key: &StoreKey) -> Vec<u8> {
    let mut entry = Vec::with_capacity(key.encoded_len());
    entry.push(key.len() as u8);
    entry.extend_from_slice(key.as_bytes());
    entry
}

/// Append `key` at the tail of the log, allocating the log on first use
pub(crate) fn append_key(
    txn: &Transaction<'_>,
    key_ref: &mut LargeBufRef,
    key: &StoreKey,
) -> Result<()> {
    let entry = encode_entry(key);
    let entry_len = entry.len() as u64;
    let mut buf = SegmentedBuffer::new(
        txn,
        key_ref.clone(),
        key_log_ref_size(txn.block_size()),
        Access::Write,
    )?;

    if !buf.reference().is_allocated() {
        buf.allocate(entry_len)?;
        buf.write_at(0, &entry)?;
    } else {
        buf.append(entry_len)?;
        buf.write_at(buf.size() - entry_len, &entry)?;
    }

    *key_ref = buf.into_reference();
    Ok(())
}

/// Walk `range` (positions relative to the log start) and hand every key
/// to `receiver`, stopping early once the receiver reports it is closed.
/// Returns the number of keys delivered.
///
/// Memory use is bounded by one block plus one key: the range is read
/// block by block as it is decoded.
pub(crate) fn stream_keys<R>(
    txn: &Transaction<'_>,
    key_ref: &LargeBufRef,
    range: Range<u64>,
    receiver: &mut R,
) -> Result<usize>
where
    R: DeletionKeyStreamReceiver + ?Sized,
{
    let buf = SegmentedBuffer::new(
        txn,
        key_ref.clone(),
        key_log_ref_size(txn.block_size()),
        Access::Read,
    )?;
    let mut reader = buf.reader(range.start, range.end)?;

    let mut len_byte = [0u8; 1];
    let mut key = Vec::with_capacity(StoreKey::MAX_SIZE);
    let mut delivered = 0;

    while !reader.is_exhausted() {
        let entry_start = reader.position();
        reader.read_exact(&mut len_byte)?;
        let len = len_byte[0] as usize;

        if len as u64 > reader.remaining() {
            return Err(DelQueueError::Corruption(format!(
                "key at offset {} claims {} bytes but only {} remain before {}",
                entry_start,
                len,
                reader.remaining(),
                range.end
            )));
        }

        key.resize(len, 0);
        reader.read_exact(&mut key)?;
        receiver.deliver(&key);
        if receiver.is_closed() {
            tracing::debug!(
                "Receiver closed at key log offset {}; {} keys left unread",
                entry_start,
                range.end - reader.position()
            );
            break;
        }
        delivered += 1;
    }

    Ok(delivered)
}
