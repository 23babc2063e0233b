//! Transactions and block locks
//!
//! A transaction is the unit of rollback: every block it write-locks is
//! imaged before its first modification, and every block it allocates is
//! remembered. Committing forgets both; dropping an uncommitted transaction
//! restores the images and frees the allocations.
//!
//! Locking is two-phase. Read locks end with their guard, but a write lock
//! stays with the transaction until it commits or rolls back, so no other
//! transaction can observe or build on a change that might still be undone.

use std::collections::{HashMap, HashSet};
use std::fmt;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock};

use crate::error::{DelQueueError, Result};

use super::{BlockId, BlockStore};

type ReadLock = ArcRwLockReadGuard<RawRwLock, Box<[u8]>>;
type WriteLock = ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>;

/// Intent declared when acquiring a block or starting a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => write!(f, "read"),
            Access::Write => write!(f, "write"),
        }
    }
}

enum GuardInner {
    Read(ReadLock),
    /// Handed back to the transaction when the guard drops
    Write(Option<WriteLock>),
}

/// Scoped access to one block
///
/// A read lock is released when the guard drops. A write lock returns to
/// the owning transaction and is released when that transaction finishes.
pub struct BlockGuard<'t> {
    id: BlockId,
    access: Access,
    inner: GuardInner,
    retained: &'t Mutex<HashMap<BlockId, WriteLock>>,
}

impl BlockGuard<'_> {
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// The intent this guard was acquired with
    pub fn access(&self) -> Access {
        self.access
    }

    /// Raw block bytes
    pub fn data(&self) -> &[u8] {
        match &self.inner {
            GuardInner::Read(guard) => &guard[..],
            GuardInner::Write(Some(guard)) => &guard[..],
            // only empty while the guard is dropping
            GuardInner::Write(None) => &[],
        }
    }

    /// Raw block bytes for modification; only valid under write intent
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        if self.access == Access::Write {
            if let GuardInner::Write(Some(guard)) = &mut self.inner {
                return Ok(&mut guard[..]);
            }
        }
        Err(DelQueueError::Storage(format!(
            "block {} is locked for read",
            self.id
        )))
    }
}

impl Drop for BlockGuard<'_> {
    fn drop(&mut self) {
        if let GuardInner::Write(slot) = &mut self.inner {
            if let Some(guard) = slot.take() {
                self.retained.lock().insert(self.id, guard);
            }
        }
    }
}

/// A storage transaction, borrowed by every operation that runs inside it
pub struct Transaction<'s> {
    store: &'s BlockStore,
    id: u64,
    access: Access,
    /// Pre-modification images of blocks this transaction write-locked
    undo: Mutex<HashMap<BlockId, Box<[u8]>>>,
    /// Blocks allocated by this transaction
    allocated: Mutex<HashSet<BlockId>>,
    /// Write locks not currently lent out to a guard
    retained: Mutex<HashMap<BlockId, WriteLock>>,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(store: &'s BlockStore, access: Access) -> Self {
        Self {
            store,
            id: store.next_txn_id(),
            access,
            undo: Mutex::new(HashMap::new()),
            allocated: Mutex::new(HashSet::new()),
            retained: Mutex::new(HashMap::new()),
            finished: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn store(&self) -> &'s BlockStore {
        self.store
    }

    pub fn block_size(&self) -> usize {
        self.store.block_size()
    }

    /// Lock a block, waiting at most the store's lock timeout
    ///
    /// A block this transaction already write-locked is lent out again
    /// without waiting. At most one guard per block may be live at a time.
    pub fn acquire(&self, id: BlockId, access: Access) -> Result<BlockGuard<'_>> {
        if access == Access::Write && self.access == Access::Read {
            return Err(DelQueueError::ReadOnlyTransaction);
        }

        let held = self.retained.lock().remove(&id);
        if let Some(guard) = held {
            return Ok(BlockGuard {
                id,
                access,
                inner: GuardInner::Write(Some(guard)),
                retained: &self.retained,
            });
        }

        let block = self.store.block(id)?;
        let timeout = self.store.lock_timeout();
        let timed_out = DelQueueError::LockTimeout { block: id, access };

        let inner = match access {
            Access::Read => GuardInner::Read(block.try_read_arc_for(timeout).ok_or(timed_out)?),
            Access::Write => {
                let guard = block.try_write_arc_for(timeout).ok_or(timed_out)?;
                self.remember_original(id, &guard);
                GuardInner::Write(Some(guard))
            }
        };

        Ok(BlockGuard {
            id,
            access,
            inner,
            retained: &self.retained,
        })
    }

    /// Allocate a fresh zeroed block owned by this transaction
    pub fn allocate_block(&self) -> Result<BlockId> {
        if self.access == Access::Read {
            return Err(DelQueueError::ReadOnlyTransaction);
        }

        let id = self.store.allocate()?;
        self.allocated.lock().insert(id);
        tracing::trace!("txn {} allocated block {}", self.id, id);
        Ok(id)
    }

    /// Make this transaction's changes permanent and release its locks
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.undo.get_mut().clear();
        self.allocated.get_mut().clear();
        self.retained.get_mut().clear();
        Ok(())
    }

    /// Undo every change made by this transaction
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo_changes()
    }

    fn remember_original(&self, id: BlockId, data: &[u8]) {
        if self.allocated.lock().contains(&id) {
            return;
        }
        self.undo
            .lock()
            .entry(id)
            .or_insert_with(|| data.to_vec().into_boxed_slice());
    }

    /// Restore images under the held write locks, then release them
    fn undo_changes(&mut self) -> Result<()> {
        let images: Vec<_> = self.undo.get_mut().drain().collect();
        let allocated: Vec<_> = self.allocated.get_mut().drain().collect();
        let retained = self.retained.get_mut();

        if !images.is_empty() || !allocated.is_empty() {
            tracing::debug!(
                "txn {} rolling back: restoring {} blocks, freeing {}",
                self.id,
                images.len(),
                allocated.len()
            );
        }

        for (id, image) in images {
            match retained.get_mut(&id) {
                Some(guard) => guard.copy_from_slice(&image),
                None => self.store.block(id)?.write().copy_from_slice(&image),
            }
        }
        for id in allocated {
            // release() zeroes the block under its own write lock
            retained.remove(&id);
            self.store.release(id)?;
        }
        retained.clear();
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.undo_changes() {
            tracing::error!("txn {} rollback failed: {}", self.id, e);
        }
    }
}
