//! Root Record Codec
//!
//! Fixed-offset layout of the delete queue's root block.
//!
//! ```text
//! ┌───────────┬───────────────────┬──────────────────────────┬──────────────────────────┐
//! │ Magic (4) │ PrimalOffset (8)  │ Offset index ref (28)    │ Key log ref (rest)       │
//! │  "DelQ"   │ i64 LE            │ offset|size|3 block ids  │ offset|size|N block ids  │
//! └───────────┴───────────────────┴──────────────────────────┴──────────────────────────┘
//! ```

use bytes::{Buf, BufMut};

use crate::error::{DelQueueError, Result};
use crate::storage::{BlockId, LargeBufRef};

/// Tag identifying a delete queue root block
pub const MAGIC: [u8; 4] = *b"DelQ";

pub(crate) const OFF_MAGIC: usize = 0;
pub(crate) const OFF_PRIMAL_OFFSET: usize = OFF_MAGIC + MAGIC.len();
pub(crate) const OFF_OFFSET_INDEX_REF: usize = OFF_PRIMAL_OFFSET + 8;

/// Reference region of the offset index: header plus three inline block ids
pub const OFFSET_INDEX_REF_SIZE: usize = LargeBufRef::HEADER_SIZE + 3 * BlockId::SIZE;

pub(crate) const OFF_KEY_LOG_REF: usize = OFF_OFFSET_INDEX_REF + OFFSET_INDEX_REF_SIZE;

const _: () = assert!(OFF_PRIMAL_OFFSET == 4);
const _: () = assert!(OFF_OFFSET_INDEX_REF == 12);
const _: () = assert!(OFFSET_INDEX_REF_SIZE == 28);
const _: () = assert!(OFF_KEY_LOG_REF == 40);

/// Size of the key log reference region for a given block size: whatever
/// the root block has left after the fixed header and the offset index ref.
pub fn key_log_ref_size(block_size: usize) -> usize {
    block_size.saturating_sub(OFF_KEY_LOG_REF)
}

/// Decoded root block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootRecord {
    /// Absolute offset that position 0 of the key log corresponds to
    pub primal_offset: i64,
    pub offset_index: LargeBufRef,
    pub key_log: LargeBufRef,
}

impl RootRecord {
    /// A fresh root: zero primal offset, both buffers unallocated
    pub fn empty(block_size: usize) -> Self {
        Self {
            primal_offset: 0,
            offset_index: LargeBufRef::unallocated(OFFSET_INDEX_REF_SIZE),
            key_log: LargeBufRef::unallocated(key_log_ref_size(block_size)),
        }
    }

    /// Decode a whole root block
    pub fn decode(block: &[u8]) -> Result<Self> {
        check_block_len(block.len())?;

        let mut found = [0u8; 4];
        found.copy_from_slice(&block[OFF_MAGIC..OFF_PRIMAL_OFFSET]);
        if found != MAGIC {
            return Err(DelQueueError::InvalidMagic { found });
        }

        let primal_offset = (&block[OFF_PRIMAL_OFFSET..OFF_OFFSET_INDEX_REF]).get_i64_le();
        let offset_index = LargeBufRef::decode(&block[OFF_OFFSET_INDEX_REF..OFF_KEY_LOG_REF])?;
        let key_log = LargeBufRef::decode(&block[OFF_KEY_LOG_REF..])?;

        Ok(Self {
            primal_offset,
            offset_index,
            key_log,
        })
    }

    /// Encode into a whole root block
    pub fn encode_into(&self, block: &mut [u8]) -> Result<()> {
        check_block_len(block.len())?;

        block[OFF_MAGIC..OFF_PRIMAL_OFFSET].copy_from_slice(&MAGIC);
        (&mut block[OFF_PRIMAL_OFFSET..OFF_OFFSET_INDEX_REF]).put_i64_le(self.primal_offset);
        self.offset_index
            .encode_into(&mut block[OFF_OFFSET_INDEX_REF..OFF_KEY_LOG_REF])?;
        self.key_log.encode_into(&mut block[OFF_KEY_LOG_REF..])?;
        Ok(())
    }

    /// Absolute offset of the key log's end
    pub fn key_log_end(&self) -> i64 {
        self.primal_offset + self.key_log.size
    }
}

/// Write an empty delete queue into a root block
pub fn initialize_empty_delete_queue(block: &mut [u8], block_size: usize) -> Result<()> {
    if block.len() != block_size {
        return Err(DelQueueError::Storage(format!(
            "root block is {} bytes, block size is {}",
            block.len(),
            block_size
        )));
    }
    RootRecord::empty(block_size).encode_into(block)
}

fn check_block_len(len: usize) -> Result<()> {
    if LargeBufRef::slots_for(key_log_ref_size(len)) == 0 {
        return Err(DelQueueError::Storage(format!(
            "{}-byte block is too small for a delete queue root",
            len
        )));
    }
    Ok(())
}
