//! Error types for the delete queue
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::storage::{Access, BlockId};

/// Result type alias using DelQueueError
pub type Result<T> = std::result::Result<T, DelQueueError>;

/// Unified error type for delete queue operations
#[derive(Debug, Error)]
pub enum DelQueueError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("Read past end of buffer: offset {offset} + len {len} > size {size}")]
    ReadPastEnd { offset: u64, len: u64, size: u64 },

    // -------------------------------------------------------------------------
    // Transaction Errors
    // -------------------------------------------------------------------------
    #[error("Timed out acquiring {access} lock on block {block}")]
    LockTimeout { block: BlockId, access: Access },

    #[error("Write access requested inside a read-only transaction")]
    ReadOnlyTransaction,

    #[error("Timed out waiting for in-flight enqueues before checkpoint")]
    CheckpointTimeout,

    // -------------------------------------------------------------------------
    // Delete Queue Errors
    // -------------------------------------------------------------------------
    #[error("Invalid delete queue magic: expected DelQ, got {found:?}")]
    InvalidMagic { found: [u8; 4] },

    #[error("Delete queue corruption detected: {0}")]
    Corruption(String),

    #[error("Key too long: {0} bytes (max 255)")]
    KeyTooLong(usize),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
