//! Configuration for the delete queue engine
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DelQueueError, Result};

/// Smallest supported block size. The root block must leave room for at
/// least two inline block ids in the key log reference.
pub const MIN_BLOCK_SIZE: u32 = 64;

/// Largest supported block size (1 MiB)
pub const MAX_BLOCK_SIZE: u32 = 1024 * 1024;

/// Main configuration for an engine instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the block image
    /// Internal structure:
    ///   {data_dir}/
    ///     └── delete_queue.img   (checkpointed block image)
    pub data_dir: PathBuf,

    /// Size of every storage block in bytes
    pub block_size: u32,

    // -------------------------------------------------------------------------
    // Transaction Configuration
    // -------------------------------------------------------------------------
    /// How long a transaction waits for a block lock (milliseconds)
    pub lock_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Durability Configuration
    // -------------------------------------------------------------------------
    /// When the engine writes its block image to disk
    pub checkpoint_policy: CheckpointPolicy,

    // -------------------------------------------------------------------------
    // Replication Configuration
    // -------------------------------------------------------------------------
    /// Bound of the channel used by streamed backfills
    pub backfill_channel_capacity: usize,
}

/// Checkpoint policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Only checkpoint on explicit `checkpoint()` / `close()`
    Manual,

    /// Checkpoint after N committed enqueues (balanced durability/performance)
    EveryNWrites { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./delqueue_data"),
            block_size: 4096,
            lock_timeout_ms: 5000,
            checkpoint_policy: CheckpointPolicy::EveryNWrites { count: 100 },
            backfill_channel_capacity: 1024,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Lock timeout as a Duration
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.block_size < MIN_BLOCK_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(DelQueueError::Config(format!(
                "block_size must be between {} and {} bytes, got {}",
                MIN_BLOCK_SIZE, MAX_BLOCK_SIZE, self.block_size
            )));
        }
        if self.block_size % 4 != 0 {
            return Err(DelQueueError::Config(format!(
                "block_size must be a multiple of 4, got {}",
                self.block_size
            )));
        }
        if let CheckpointPolicy::EveryNWrites { count: 0 } = self.checkpoint_policy {
            return Err(DelQueueError::Config(
                "checkpoint count must be greater than zero".to_string(),
            ));
        }
        if self.backfill_channel_capacity == 0 {
            return Err(DelQueueError::Config(
                "backfill_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the block image)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the lock timeout (in milliseconds)
    pub fn lock_timeout_ms(mut self, ms: u64) -> Self {
        self.config.lock_timeout_ms = ms;
        self
    }

    /// Set the checkpoint policy
    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.config.checkpoint_policy = policy;
        self
    }

    /// Set the backfill channel bound
    pub fn backfill_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.backfill_channel_capacity = capacity;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
