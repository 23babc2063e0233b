//! Block Store
//!
//! Arena of fixed-size blocks, each behind its own lock.
//!
//! ## Responsibilities
//! - Hand out block ids and zeroed blocks
//! - Reuse freed blocks
//! - Start read and write transactions
//! - Persist/restore the whole arena as a block image

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::config::Config;
use crate::error::{DelQueueError, Result};

use super::{image, Access, BlockId, Transaction};

/// A single block: shared so guards can own their lock
pub(crate) type SharedBlock = Arc<RwLock<Box<[u8]>>>;

/// In-memory block store
///
/// ## Concurrency:
/// - `blocks`: RwLock over the arena vector (read for lookup, write for growth)
/// - each block: its own RwLock, taken through `Transaction::acquire`
/// - `free_blocks`: Mutex (short critical sections only)
/// - All methods use `&self`
pub struct BlockStore {
    /// Size of every block in bytes
    block_size: usize,

    /// How long block lock acquisition may wait
    lock_timeout: Duration,

    /// Block arena, indexed by `BlockId`
    blocks: RwLock<Vec<SharedBlock>>,

    /// Released blocks available for reuse
    free_blocks: Mutex<Vec<BlockId>>,

    /// Next transaction id (for log correlation)
    next_txn_id: AtomicU64,
}

impl BlockStore {
    /// Create an empty store
    pub fn new(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(
            config.block_size as usize,
            config.lock_timeout(),
            Vec::new(),
            Vec::new(),
        ))
    }

    /// Assemble a store from existing block contents
    pub(crate) fn from_parts(
        block_size: usize,
        lock_timeout: Duration,
        blocks: Vec<Box<[u8]>>,
        free_blocks: Vec<BlockId>,
    ) -> Self {
        let blocks = blocks
            .into_iter()
            .map(|data| Arc::new(RwLock::new(data)))
            .collect();

        Self {
            block_size,
            lock_timeout,
            blocks: RwLock::new(blocks),
            free_blocks: Mutex::new(free_blocks),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Load a store from a block image written by `save_image`
    pub fn load_image(path: &Path, config: &Config) -> Result<Self> {
        config.validate()?;
        image::read_image(path, config)
    }

    /// Write every block to a block image at `path`
    pub fn save_image(&self, path: &Path) -> Result<()> {
        image::write_image(self, path)
    }

    /// Start a read-only transaction
    pub fn begin_read(&self) -> Transaction<'_> {
        Transaction::new(self, Access::Read)
    }

    /// Start a read-write transaction
    pub fn begin_write(&self) -> Transaction<'_> {
        Transaction::new(self, Access::Write)
    }

    /// Block size in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Lock acquisition timeout
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Number of blocks in the arena (live and free)
    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Number of blocks waiting for reuse
    pub fn free_block_count(&self) -> usize {
        self.free_blocks.lock().len()
    }

    // =========================================================================
    // Crate-internal block management
    // =========================================================================

    /// Look up a block's lock
    pub(crate) fn block(&self, id: BlockId) -> Result<SharedBlock> {
        self.blocks
            .read()
            .get(id.index())
            .cloned()
            .ok_or(DelQueueError::BlockNotFound(id))
    }

    /// Hand out a zeroed block, reusing a freed one when possible
    pub(crate) fn allocate(&self) -> Result<BlockId> {
        if let Some(id) = self.free_blocks.lock().pop() {
            return Ok(id);
        }

        let mut blocks = self.blocks.write();
        let index = u32::try_from(blocks.len())
            .ok()
            .filter(|&i| i != BlockId::NULL.0)
            .ok_or_else(|| DelQueueError::Storage("block id space exhausted".to_string()))?;

        blocks.push(Arc::new(RwLock::new(
            vec![0u8; self.block_size].into_boxed_slice(),
        )));
        Ok(BlockId(index))
    }

    /// Zero a block and put it back on the free list
    pub(crate) fn release(&self, id: BlockId) -> Result<()> {
        let block = self.block(id)?;
        block.write().fill(0);
        self.free_blocks.lock().push(id);
        Ok(())
    }

    /// Snapshot of the arena's locks, in id order
    pub(crate) fn blocks_snapshot(&self) -> Vec<SharedBlock> {
        self.blocks.read().clone()
    }

    /// Snapshot of the free list
    pub(crate) fn free_blocks(&self) -> Vec<BlockId> {
        self.free_blocks.lock().clone()
    }

    pub(crate) fn next_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }
}
