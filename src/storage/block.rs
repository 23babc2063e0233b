//! Block identifiers
//!
//! Blocks are addressed by a 32-bit id; the all-ones id marks an empty slot.

use std::fmt;

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Identifier of a storage block
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Sentinel for "no block"
    pub const NULL: BlockId = BlockId(u32::MAX);

    /// Encoded size of a block id
    pub const SIZE: usize = 4;

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Index into the store's block arena
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    /// Read the `slot`-th block id from a packed id array
    pub(crate) fn read_slot(data: &[u8], slot: usize) -> BlockId {
        let mut raw = &data[slot * Self::SIZE..(slot + 1) * Self::SIZE];
        BlockId(raw.get_u32_le())
    }

    /// Write the `slot`-th block id into a packed id array
    pub(crate) fn write_slot(data: &mut [u8], slot: usize, id: BlockId) {
        let mut raw = &mut data[slot * Self::SIZE..(slot + 1) * Self::SIZE];
        raw.put_u32_le(id.0);
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}
