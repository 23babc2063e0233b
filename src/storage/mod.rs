//! Storage Module
//!
//! Block storage and transactions consumed by the delete queue.
//!
//! ## Responsibilities
//! - Fixed-size blocks addressed by id, each behind its own RwLock
//! - Transactions holding write locks until commit, with rollback on drop
//! - Segmented buffers ("large bufs") spanning many blocks
//! - Checkpointing the block arena to a single image file
//!
//! ## Layering
//! ```text
//! ┌────────────────────────────────────────┐
//! │ SegmentedBuffer (large_buf)            │
//! │   reference inline in a parent block   │
//! ├────────────────────────────────────────┤
//! │ Transaction                            │
//! │   acquire(block, read|write) → guard   │
//! │   allocate_block / commit / rollback   │
//! ├────────────────────────────────────────┤
//! │ BlockStore                             │
//! │   arena + free list + block image      │
//! └────────────────────────────────────────┘
//! ```

mod block;
mod image;
mod large_buf;
mod store;
mod transaction;

pub use block::BlockId;
pub use large_buf::{LargeBufRef, SegmentReader, SegmentedBuffer};
pub use store::BlockStore;
pub use transaction::{Access, BlockGuard, Transaction};

pub(crate) use image::image_exists;
