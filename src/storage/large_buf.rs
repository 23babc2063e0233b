//! Segmented Buffer (large buf)
//!
//! A growable byte region spread over many blocks, described by a small
//! fixed-size reference that lives inline in some other block.
//!
//! ## Reference Format
//! ```text
//! ┌────────────┬────────────┬──────────────────────────────┐
//! │ Offset (8) │ Size (8)   │ Block ids (4 × slots)        │
//! └────────────┴────────────┴──────────────────────────────┘
//! ```
//! All fields little-endian. A reference with size 0 is unallocated and
//! all of its slots hold the null block id.
//!
//! ## Block Tree
//! Byte `i` of the buffer lives at position `offset + i`, in leaf
//! `(offset + i) / block_size`. While the leaves fit in the inline slots
//! the slots point at leaves directly. Beyond that, levels of internal
//! blocks (each a packed array of `block_size / 4` child ids) are added
//! above the leaves. The level count is derived from `offset + size`.

use bytes::{Buf, BufMut};

use crate::error::{DelQueueError, Result};

use super::{Access, BlockId, Transaction};

/// Inline reference to a segmented buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LargeBufRef {
    /// Logical position of the first live byte
    pub offset: i64,
    /// Number of live bytes
    pub size: i64,
    /// Inline slots; unused slots are null
    pub block_ids: Vec<BlockId>,
}

impl LargeBufRef {
    /// Offset (8) + Size (8)
    pub const HEADER_SIZE: usize = 16;

    /// Number of inline slots a reference region of `ref_size` bytes holds
    pub fn slots_for(ref_size: usize) -> usize {
        ref_size.saturating_sub(Self::HEADER_SIZE) / BlockId::SIZE
    }

    /// An unallocated reference sized for a `ref_size`-byte region
    pub fn unallocated(ref_size: usize) -> Self {
        Self {
            offset: 0,
            size: 0,
            block_ids: vec![BlockId::NULL; Self::slots_for(ref_size)],
        }
    }

    /// A size of zero is only ever seen in the unallocated state
    pub fn is_allocated(&self) -> bool {
        self.size != 0
    }

    pub fn slot_count(&self) -> usize {
        self.block_ids.len()
    }

    /// Logical end: `offset + size`
    pub fn end(&self) -> u64 {
        (self.offset + self.size) as u64
    }

    /// Decode a reference occupying all of `region`
    pub fn decode(region: &[u8]) -> Result<Self> {
        if region.len() < Self::HEADER_SIZE + BlockId::SIZE {
            return Err(DelQueueError::Corruption(format!(
                "large buf reference region too small: {} bytes",
                region.len()
            )));
        }

        let mut header = &region[..Self::HEADER_SIZE];
        let offset = header.get_i64_le();
        let size = header.get_i64_le();
        if offset < 0 || size < 0 {
            return Err(DelQueueError::Corruption(format!(
                "large buf reference has negative bounds (offset {}, size {})",
                offset, size
            )));
        }

        let slots = Self::slots_for(region.len());
        let ids = &region[Self::HEADER_SIZE..];
        let block_ids = (0..slots).map(|slot| BlockId::read_slot(ids, slot)).collect();

        Ok(Self {
            offset,
            size,
            block_ids,
        })
    }

    /// Encode into a region of exactly this reference's size
    pub fn encode_into(&self, region: &mut [u8]) -> Result<()> {
        if Self::slots_for(region.len()) != self.block_ids.len() {
            return Err(DelQueueError::Storage(format!(
                "large buf reference with {} slots does not fit a {}-byte region",
                self.block_ids.len(),
                region.len()
            )));
        }

        let (mut header, ids) = region.split_at_mut(Self::HEADER_SIZE);
        header.put_i64_le(self.offset);
        header.put_i64_le(self.size);
        for (slot, id) in self.block_ids.iter().enumerate() {
            BlockId::write_slot(ids, slot, *id);
        }
        Ok(())
    }
}

/// Handle on a segmented buffer, opened inside a transaction with a fixed
/// intent. Mutations update the held reference; the caller writes it back
/// into its inline location with `into_reference`.
pub struct SegmentedBuffer<'a> {
    txn: &'a Transaction<'a>,
    lbref: LargeBufRef,
    access: Access,
    block_size: u64,
    /// Child ids per internal block
    fanout: u64,
}

impl<'a> SegmentedBuffer<'a> {
    /// Open a buffer whose reference lives in a `ref_limit`-byte region
    pub fn new(
        txn: &'a Transaction<'a>,
        lbref: LargeBufRef,
        ref_limit: usize,
        access: Access,
    ) -> Result<Self> {
        let slots = LargeBufRef::slots_for(ref_limit);
        if slots == 0 || lbref.slot_count() != slots {
            return Err(DelQueueError::Corruption(format!(
                "large buf reference has {} slots, expected {} for a {}-byte limit",
                lbref.slot_count(),
                slots,
                ref_limit
            )));
        }

        let block_size = txn.block_size() as u64;
        let fanout = block_size / BlockId::SIZE as u64;
        if slots as u64 > fanout {
            return Err(DelQueueError::Storage(format!(
                "reference limit {} exceeds what one block can index",
                ref_limit
            )));
        }

        Ok(Self {
            txn,
            lbref,
            access,
            block_size,
            fanout,
        })
    }

    pub fn reference(&self) -> &LargeBufRef {
        &self.lbref
    }

    pub fn into_reference(self) -> LargeBufRef {
        self.lbref
    }

    /// Live size in bytes
    pub fn size(&self) -> u64 {
        self.lbref.size as u64
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Bring an unallocated buffer to `size` bytes (size must be non-zero)
    pub fn allocate(&mut self, size: u64) -> Result<()> {
        self.require_write()?;
        if self.lbref.is_allocated() {
            return Err(DelQueueError::Storage(
                "large buf is already allocated".to_string(),
            ));
        }
        if size == 0 {
            return Err(DelQueueError::Storage(
                "cannot allocate an empty large buf".to_string(),
            ));
        }

        self.lbref.offset = 0;
        self.grow(0, size)?;
        self.lbref.size = Self::to_i64(size)?;
        tracing::debug!("allocated large buf of {} bytes", size);
        Ok(())
    }

    /// Grow an allocated buffer by `delta` bytes at the tail
    pub fn append(&mut self, delta: u64) -> Result<()> {
        self.require_write()?;
        if !self.lbref.is_allocated() {
            return Err(DelQueueError::Storage(
                "cannot append to an unallocated large buf".to_string(),
            ));
        }

        let old_end = self.lbref.end();
        let new_end = old_end
            .checked_add(delta)
            .ok_or_else(|| DelQueueError::Storage("large buf size overflow".to_string()))?;
        self.grow(old_end, new_end)?;
        self.lbref.size = Self::to_i64(self.size() + delta)?;
        Ok(())
    }

    /// Overwrite bytes starting at `pos`
    pub fn write_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        self.require_write()?;
        self.check_bounds(pos, data.len() as u64)?;

        let mut done = 0usize;
        while done < data.len() {
            let (leaf, within, n) = self.chunk_at(pos + done as u64, data.len() - done);
            let id = self.leaf_id(leaf)?;
            let mut guard = self.txn.acquire(id, Access::Write)?;
            guard.data_mut()?[within..within + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Fill `out` with the bytes starting at `pos`
    pub fn read_at(&self, pos: u64, out: &mut [u8]) -> Result<()> {
        self.check_bounds(pos, out.len() as u64)?;

        let mut done = 0usize;
        while done < out.len() {
            let (leaf, within, n) = self.chunk_at(pos + done as u64, out.len() - done);
            let id = self.leaf_id(leaf)?;
            let guard = self.txn.acquire(id, Access::Read)?;
            out[done..done + n].copy_from_slice(&guard.data()[within..within + n]);
            done += n;
        }
        Ok(())
    }

    /// Sequential reader over `[begin, end)`, holding at most one block's
    /// worth of bytes at a time
    pub fn reader(&self, begin: u64, end: u64) -> Result<SegmentReader<'_, 'a>> {
        if begin > end {
            return Err(DelQueueError::Storage(format!(
                "invalid read range {}..{}",
                begin, end
            )));
        }
        self.check_bounds(begin, end - begin)?;

        Ok(SegmentReader {
            buf: self,
            pos: begin,
            end,
            chunk: Vec::new(),
            chunk_pos: 0,
        })
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn require_write(&self) -> Result<()> {
        if self.access != Access::Write {
            return Err(DelQueueError::Storage(
                "large buf opened for read cannot be modified".to_string(),
            ));
        }
        Ok(())
    }

    fn to_i64(value: u64) -> Result<i64> {
        i64::try_from(value)
            .map_err(|_| DelQueueError::Storage("large buf size overflow".to_string()))
    }

    fn check_bounds(&self, pos: u64, len: u64) -> Result<()> {
        let size = self.size();
        match pos.checked_add(len) {
            Some(end) if end <= size => Ok(()),
            _ => Err(DelQueueError::ReadPastEnd {
                offset: pos,
                len,
                size,
            }),
        }
    }

    /// (leaf index, offset within leaf, byte count) for the chunk at `pos`
    fn chunk_at(&self, pos: u64, wanted: usize) -> (u64, usize, usize) {
        let abs = self.lbref.offset as u64 + pos;
        let leaf = abs / self.block_size;
        let within = (abs % self.block_size) as usize;
        let n = (self.block_size as usize - within).min(wanted);
        (leaf, within, n)
    }

    /// Tree height needed to address `end` bytes
    fn levels_for(&self, end: u64) -> Result<u32> {
        let leaves = end.div_ceil(self.block_size).max(1);
        let mut reach = self.lbref.slot_count() as u64;
        let mut levels = 1;
        while reach < leaves {
            reach = reach
                .checked_mul(self.fanout)
                .ok_or_else(|| DelQueueError::Storage("large buf too deep".to_string()))?;
            levels += 1;
        }
        Ok(levels)
    }

    /// Leaves reachable through one inline slot at the given height
    fn slot_span(&self, levels: u32) -> u64 {
        self.fanout.pow(levels - 1)
    }

    /// Resolve a leaf index to its block id
    fn leaf_id(&self, leaf: u64) -> Result<BlockId> {
        let levels = self.levels_for(self.lbref.end())?;
        let mut span = self.slot_span(levels);
        let slot = (leaf / span) as usize;
        let mut rem = leaf % span;

        let mut id = *self.lbref.block_ids.get(slot).ok_or_else(|| {
            DelQueueError::Corruption(format!("leaf {} beyond inline slots", leaf))
        })?;

        while span > 1 {
            if id.is_null() {
                return Err(DelQueueError::Corruption(format!(
                    "missing internal block on the path to leaf {}",
                    leaf
                )));
            }
            span /= self.fanout;
            let guard = self.txn.acquire(id, Access::Read)?;
            id = BlockId::read_slot(guard.data(), (rem / span) as usize);
            rem %= span;
        }

        if id.is_null() {
            return Err(DelQueueError::Corruption(format!("missing leaf block {}", leaf)));
        }
        Ok(id)
    }

    /// Make sure every leaf needed for `new_end` exists
    fn grow(&mut self, old_end: u64, new_end: u64) -> Result<()> {
        let old_leaves = old_end.div_ceil(self.block_size);
        let new_leaves = new_end.div_ceil(self.block_size);
        let new_levels = self.levels_for(new_end)?;

        if old_leaves > 0 {
            for _ in self.levels_for(old_end)?..new_levels {
                self.add_level()?;
            }
        }
        for leaf in old_leaves..new_leaves {
            self.attach_leaf(leaf, new_levels)?;
        }
        Ok(())
    }

    /// Push the inline slots down into a new internal block
    fn add_level(&mut self) -> Result<()> {
        let txn = self.txn;
        let internal = self.new_node(true)?;
        {
            let mut guard = txn.acquire(internal, Access::Write)?;
            let data = guard.data_mut()?;
            for (slot, id) in self.lbref.block_ids.iter().enumerate() {
                BlockId::write_slot(data, slot, *id);
            }
        }

        self.lbref.block_ids.fill(BlockId::NULL);
        self.lbref.block_ids[0] = internal;
        tracing::debug!("large buf grew a level (new top block {})", internal);
        Ok(())
    }

    /// Create the path to `leaf`, allocating missing blocks on the way
    fn attach_leaf(&mut self, leaf: u64, levels: u32) -> Result<()> {
        let txn = self.txn;
        let mut span = self.slot_span(levels);
        let slot = (leaf / span) as usize;
        let mut rem = leaf % span;

        if slot >= self.lbref.slot_count() {
            return Err(DelQueueError::Storage(format!(
                "leaf {} does not fit in {} inline slots",
                leaf,
                self.lbref.slot_count()
            )));
        }

        let mut id = self.lbref.block_ids[slot];
        if id.is_null() {
            id = self.new_node(span > 1)?;
            self.lbref.block_ids[slot] = id;
        }

        while span > 1 {
            span /= self.fanout;
            let child = (rem / span) as usize;
            rem %= span;

            let mut guard = txn.acquire(id, Access::Write)?;
            let mut next = BlockId::read_slot(guard.data(), child);
            if next.is_null() {
                next = self.new_node(span > 1)?;
                BlockId::write_slot(guard.data_mut()?, child, next);
            }
            id = next;
        }
        Ok(())
    }

    /// Allocate a leaf (zeroed) or an internal block (all slots null)
    fn new_node(&self, internal: bool) -> Result<BlockId> {
        let id = self.txn.allocate_block()?;
        if internal {
            let mut guard = self.txn.acquire(id, Access::Write)?;
            guard.data_mut()?.fill(0xFF);
        }
        Ok(id)
    }
}

/// Sequential reader over a byte range of a segmented buffer
pub struct SegmentReader<'b, 'a> {
    buf: &'b SegmentedBuffer<'a>,
    /// Position of the next unread byte
    pos: u64,
    end: u64,
    /// Bytes of the current leaf, starting at the position they were loaded from
    chunk: Vec<u8>,
    chunk_pos: usize,
}

impl SegmentReader<'_, '_> {
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }

    pub fn is_exhausted(&self) -> bool {
        self.pos >= self.end
    }

    /// Fill `out` from the range, failing if it would pass the range end
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        if out.len() as u64 > self.remaining() {
            return Err(DelQueueError::ReadPastEnd {
                offset: self.pos,
                len: out.len() as u64,
                size: self.end,
            });
        }

        let mut done = 0usize;
        while done < out.len() {
            if self.chunk_pos == self.chunk.len() {
                self.refill()?;
            }
            let n = (self.chunk.len() - self.chunk_pos).min(out.len() - done);
            out[done..done + n].copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + n]);
            self.chunk_pos += n;
            self.pos += n as u64;
            done += n;
        }
        Ok(())
    }

    /// Load the rest of the current leaf (clipped to the range end)
    fn refill(&mut self) -> Result<()> {
        let wanted = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        let (_, _, n) = self.buf.chunk_at(self.pos, wanted);
        self.chunk.resize(n, 0);
        self.buf.read_at(self.pos, &mut self.chunk)?;
        self.chunk_pos = 0;
        Ok(())
    }
}
