//! Shared value types
//!
//! Replication timestamps and store keys as they travel through the queue.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DelQueueError, Result};

/// A replication timestamp (seconds-granularity logical clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ReplTimestamp {
    pub time: u32,
}

impl ReplTimestamp {
    /// The earliest representable timestamp
    pub const DISTANT_PAST: ReplTimestamp = ReplTimestamp { time: 0 };

    /// The latest representable timestamp
    pub const DISTANT_FUTURE: ReplTimestamp = ReplTimestamp { time: u32::MAX };

    pub const fn new(time: u32) -> Self {
        Self { time }
    }
}

impl From<u32> for ReplTimestamp {
    fn from(time: u32) -> Self {
        Self { time }
    }
}

impl fmt::Display for ReplTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.time)
    }
}

/// A key as stored in the document store: at most 255 bytes, so that its
/// length fits the single length byte of the on-disk encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    bytes: Bytes,
}

impl StoreKey {
    /// Longest key that can be stored
    pub const MAX_SIZE: usize = u8::MAX as usize;

    /// Create a key, rejecting anything longer than 255 bytes
    pub fn new(bytes: impl Into<Bytes>) -> Result<Self> {
        let bytes = bytes.into();
        if bytes.len() > Self::MAX_SIZE {
            return Err(DelQueueError::KeyTooLong(bytes.len()));
        }
        Ok(Self { bytes })
    }

    /// Key content (without the length prefix)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Bytes the key occupies once length-prefixed
    pub fn encoded_len(&self) -> usize {
        1 + self.bytes.len()
    }
}

impl TryFrom<&[u8]> for StoreKey {
    type Error = DelQueueError;

    fn try_from(value: &[u8]) -> Result<Self> {
        StoreKey::new(Bytes::copy_from_slice(value))
    }
}

impl TryFrom<&str> for StoreKey {
    type Error = DelQueueError;

    fn try_from(value: &str) -> Result<Self> {
        StoreKey::try_from(value.as_bytes())
    }
}
