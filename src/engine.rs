//! Engine Module
//!
//! One document store's delete queue, with its block store and image file.
//!
//! ## Responsibilities
//! - Open the block image or create a fresh store with an empty queue
//! - Run enqueues and range queries inside transactions
//! - Checkpoint the block image per the configured policy
//! - Stream backfills to another thread

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use parking_lot::RwLock;

use crate::config::{CheckpointPolicy, Config};
use crate::delete_queue::{
    self, ChannelReceiver, CollectingReceiver, DeletionEvent, DeletionKeyStreamReceiver, QueueStats,
};
use crate::error::{DelQueueError, Result};
use crate::storage::{self, BlockId, BlockStore};
use crate::types::{ReplTimestamp, StoreKey};

/// The delete queue engine
///
/// ## Concurrency Model
///
/// - **Enqueues**: serialized by the root block's write lock, which is
///   held until the enqueue commits
/// - **Range queries**: share the root block's read lock with each other
///   and never see an uncommitted enqueue
/// - **Checkpoints**: take `checkpoint_lock` exclusively, waiting at most
///   the lock timeout, so the image never captures a half-applied
///   enqueue; enqueues hold it shared. Read transactions change nothing
///   and stay out of it, so a stalled backfill cannot hold a checkpoint up
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Location of the block image
    image_path: PathBuf,

    /// Block storage holding the queue
    store: BlockStore,

    /// Root block of this store's delete queue
    root: BlockId,

    /// Excludes write transactions while a checkpoint is written
    checkpoint_lock: RwLock<()>,

    /// Enqueues committed since the last checkpoint
    writes_since_checkpoint: AtomicUsize,
}

impl Engine {
    // =========================================================================
    // Internal Constants
    // =========================================================================
    const IMAGE_FILENAME: &'static str = "delete_queue.img";

    /// The queue root is the first block a store allocates
    pub const ROOT_BLOCK: BlockId = BlockId(0);

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Load the block image if one exists
    /// 3. Otherwise create a store, initialize an empty queue in block 0
    ///    and write the first image
    /// 4. Check the root block's magic
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;
        let image_path = config.data_dir.join(Self::IMAGE_FILENAME);

        let store = if storage::image_exists(&image_path) {
            let store = BlockStore::load_image(&image_path, &config)?;
            tracing::info!(
                "Loaded block image {} ({} blocks)",
                image_path.display(),
                store.block_count()
            );
            store
        } else {
            let store = BlockStore::new(&config)?;
            let txn = store.begin_write();
            let root = delete_queue::create_delete_queue(&txn)?;
            txn.commit()?;
            if root != Self::ROOT_BLOCK {
                return Err(DelQueueError::Storage(format!(
                    "fresh store placed the queue root at {}",
                    root
                )));
            }
            store.save_image(&image_path)?;
            tracing::info!("Initialized empty delete queue in {}", config.data_dir.display());
            store
        };

        // Validates the root's magic before anything is served
        let stats = {
            let txn = store.begin_read();
            delete_queue::inspect(&txn, Self::ROOT_BLOCK)?
        };
        tracing::debug!(
            "Delete queue holds {} index entries, {} key log bytes",
            stats.index_entries,
            stats.key_log_bytes
        );

        Ok(Self {
            config,
            image_path,
            store,
            root: Self::ROOT_BLOCK,
            checkpoint_lock: RwLock::new(()),
            writes_since_checkpoint: AtomicUsize::new(0),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Record that `key` was deleted at `timestamp`
    pub fn record_deletion(&self, timestamp: ReplTimestamp, key: &[u8]) -> Result<()> {
        let key = StoreKey::try_from(key)?;

        {
            let _shared = self.checkpoint_lock.read();
            let txn = self.store.begin_write();
            delete_queue::enqueue(&txn, self.root, timestamp, &key)?;
            txn.commit()?;
        }

        let writes = self.writes_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if let CheckpointPolicy::EveryNWrites { count } = self.config.checkpoint_policy {
            if writes >= count {
                self.checkpoint()?;
            }
        }
        Ok(())
    }

    /// Stream keys deleted in `[begin, end)` to `receiver`
    pub fn deletions_between<R>(
        &self,
        begin: ReplTimestamp,
        end: ReplTimestamp,
        receiver: &mut R,
    ) -> Result<usize>
    where
        R: DeletionKeyStreamReceiver + ?Sized,
    {
        let txn = self.store.begin_read();
        let delivered = delete_queue::range_query(&txn, self.root, begin, end, receiver)?;
        txn.commit()?;
        Ok(delivered)
    }

    /// Keys deleted in `[begin, end)`, gathered into memory
    pub fn collect_deletions(&self, begin: ReplTimestamp, end: ReplTimestamp) -> Result<Vec<Vec<u8>>> {
        let mut receiver = CollectingReceiver::new();
        self.deletions_between(begin, end, &mut receiver)?;
        Ok(receiver.into_keys())
    }

    /// Run a range query on a worker thread, streaming its keys over a
    /// bounded channel. The join handle carries the query's outcome.
    pub fn spawn_backfill(
        self: &Arc<Self>,
        begin: ReplTimestamp,
        end: ReplTimestamp,
    ) -> (Receiver<DeletionEvent>, JoinHandle<Result<usize>>) {
        let (sender, events) = channel::bounded(self.config.backfill_channel_capacity);
        let engine = Arc::clone(self);

        let handle = thread::spawn(move || {
            let mut receiver = ChannelReceiver::new(sender);
            let outcome = engine.deletions_between(begin, end, &mut receiver);
            if let Err(ref e) = outcome {
                tracing::warn!("Backfill {}..{} failed: {}", begin, end, e);
            }
            outcome
        });

        (events, handle)
    }

    /// Summarize the queue
    pub fn stats(&self) -> Result<QueueStats> {
        let txn = self.store.begin_read();
        delete_queue::inspect(&txn, self.root)
    }

    /// Write the block image to disk
    ///
    /// Waits at most the lock timeout for in-flight enqueues to commit.
    pub fn checkpoint(&self) -> Result<()> {
        let _exclusive = self
            .checkpoint_lock
            .try_write_for(self.config.lock_timeout())
            .ok_or(DelQueueError::CheckpointTimeout)?;
        self.store.save_image(&self.image_path)?;
        self.writes_since_checkpoint.store(0, Ordering::SeqCst);
        tracing::info!("Checkpointed delete queue to {}", self.image_path.display());
        Ok(())
    }

    /// Close the engine gracefully
    ///
    /// Writes a final checkpoint
    pub fn close(self) -> Result<()> {
        self.checkpoint()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Get the block image path
    pub fn image_path(&self) -> &Path {
        &self.image_path
    }

    /// Get the underlying block store
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// Get the queue's root block
    pub fn root(&self) -> BlockId {
        self.root
    }

    /// Enqueues committed since the last checkpoint
    pub fn writes_since_checkpoint(&self) -> usize {
        self.writes_since_checkpoint.load(Ordering::SeqCst)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
