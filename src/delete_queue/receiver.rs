//! Deletion key receivers
//!
//! The caller of a range query owns a receiver and lends it for the
//! duration of the call. Keys arrive in key log order (ascending
//! timestamp, enqueue order within a timestamp), then `complete()` is
//! called exactly once.

use crossbeam::channel::Sender;

/// Sink for the keys produced by a range query
pub trait DeletionKeyStreamReceiver {
    /// Called once per deleted key, in log order
    fn deliver(&mut self, key: &[u8]);

    /// Called exactly once when the stream ends, on every path
    fn complete(&mut self);

    /// True once further keys would be thrown away; the query then stops
    /// walking the log early. `complete()` is still called.
    fn is_closed(&self) -> bool {
        false
    }
}

/// Receiver that gathers keys in memory
#[derive(Debug, Default)]
pub struct CollectingReceiver {
    keys: Vec<Vec<u8>>,
    completions: usize,
}

impl CollectingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> &[Vec<u8>] {
        &self.keys
    }

    pub fn into_keys(self) -> Vec<Vec<u8>> {
        self.keys
    }

    /// Number of times `complete()` has been called
    pub fn completions(&self) -> usize {
        self.completions
    }

    pub fn is_complete(&self) -> bool {
        self.completions > 0
    }
}

impl DeletionKeyStreamReceiver for CollectingReceiver {
    fn deliver(&mut self, key: &[u8]) {
        self.keys.push(key.to_vec());
    }

    fn complete(&mut self) {
        self.completions += 1;
    }
}

/// Events carried by a `ChannelReceiver`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionEvent {
    Key(Vec<u8>),
    Complete,
}

/// Receiver that forwards keys over a crossbeam channel, so a backfill
/// can be consumed on another thread while the query runs.
///
/// A bounded channel applies backpressure: the query (and its root read
/// lock) waits while the consumer is behind. Once the consumer hangs up
/// the receiver reports itself closed and the query stops.
pub struct ChannelReceiver {
    sender: Sender<DeletionEvent>,
    disconnected: bool,
}

impl ChannelReceiver {
    pub fn new(sender: Sender<DeletionEvent>) -> Self {
        Self {
            sender,
            disconnected: false,
        }
    }

    fn send(&mut self, event: DeletionEvent) {
        if self.disconnected {
            return;
        }
        if self.sender.send(event).is_err() {
            tracing::debug!("Deletion stream consumer hung up; dropping remaining keys");
            self.disconnected = true;
        }
    }
}

impl DeletionKeyStreamReceiver for ChannelReceiver {
    fn deliver(&mut self, key: &[u8]) {
        self.send(DeletionEvent::Key(key.to_vec()));
    }

    fn complete(&mut self) {
        self.send(DeletionEvent::Complete);
    }

    fn is_closed(&self) -> bool {
        self.disconnected
    }
}
