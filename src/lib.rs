//! # delqueue
//!
//! A block-backed replication delete queue:
//! - Records "key K was deleted at time T" for one document store
//! - Answers "which keys were deleted in `[T1, T2)`" for replica backfill
//! - Transactional block storage with rollback on drop
//! - Checkpointed to a single block image file
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                               │
//! │        record_deletion / deletions_between / backfill        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Delete Queue                             │
//! │        root block ─▶ offset index  +  key log                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ Transaction │          │  Segmented  │
//!   │ (locks/undo)│          │   Buffers   │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌─────────────┐
//!               │ BlockStore  │
//!               │  (+ image)  │
//!               └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod types;

pub mod storage;
pub mod delete_queue;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DelQueueError, Result};
pub use config::{CheckpointPolicy, Config};
pub use engine::Engine;
pub use types::{ReplTimestamp, StoreKey};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of delqueue
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
