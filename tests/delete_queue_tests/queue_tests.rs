//! Tests for the delete queue
//!
//! These tests verify:
//! - Offset index contents after enqueues (coalescing, clamping)
//! - Range queries over timestamp windows
//! - Exactly-once completion on every path
//! - Corruption detection
//! - Rollback of uncommitted enqueues
//! - Isolation between overlapping write transactions

use std::thread;

use crossbeam::channel;
use delqueue::config::Config;
use delqueue::delete_queue::{self, CollectingReceiver, IndexEntry, RootRecord, MAGIC};
use delqueue::storage::{Access, BlockId, BlockStore};
use delqueue::{DelQueueError, ReplTimestamp, StoreKey};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_queue(block_size: u32) -> (BlockStore, BlockId) {
    setup_queue_with_timeout(block_size, 100)
}

fn setup_queue_with_timeout(block_size: u32, lock_timeout_ms: u64) -> (BlockStore, BlockId) {
    let config = Config::builder()
        .block_size(block_size)
        .lock_timeout_ms(lock_timeout_ms)
        .build();
    let store = BlockStore::new(&config).unwrap();
    let txn = store.begin_write();
    let root = delete_queue::create_delete_queue(&txn).unwrap();
    txn.commit().unwrap();
    (store, root)
}

fn ts(time: u32) -> ReplTimestamp {
    ReplTimestamp::new(time)
}

fn enqueue(store: &BlockStore, root: BlockId, time: u32, key: &[u8]) {
    let txn = store.begin_write();
    delete_queue::enqueue(&txn, root, ts(time), &StoreKey::try_from(key).unwrap()).unwrap();
    txn.commit().unwrap();
}

fn query(store: &BlockStore, root: BlockId, begin: u32, end: u32) -> CollectingReceiver {
    let txn = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    delete_queue::range_query(&txn, root, ts(begin), ts(end), &mut receiver).unwrap();
    receiver
}

fn keys(store: &BlockStore, root: BlockId, begin: u32, end: u32) -> Vec<Vec<u8>> {
    query(store, root, begin, end).into_keys()
}

fn index(store: &BlockStore, root: BlockId) -> Vec<IndexEntry> {
    let txn = store.begin_read();
    delete_queue::read_offset_index(&txn, root).unwrap()
}

/// Rewrite the root record in place
fn tamper_root(store: &BlockStore, root: BlockId, edit: impl FnOnce(&mut RootRecord)) {
    let txn = store.begin_write();
    {
        let mut guard = txn.acquire(root, Access::Write).unwrap();
        let mut record = RootRecord::decode(guard.data()).unwrap();
        edit(&mut record);
        record.encode_into(guard.data_mut().unwrap()).unwrap();
    }
    txn.commit().unwrap();
}

fn k(s: &str) -> Vec<u8> {
    s.as_bytes().to_vec()
}

// =============================================================================
// Initialization Tests
// =============================================================================

#[test]
fn test_new_queue_root_layout() {
    let (store, root) = setup_queue(4096);
    let txn = store.begin_read();
    let guard = txn.acquire(root, Access::Read).unwrap();

    assert_eq!(&guard.data()[0..4], &MAGIC);
    assert_eq!(&guard.data()[4..12], &[0u8; 8]);

    let record = RootRecord::decode(guard.data()).unwrap();
    assert_eq!(record.primal_offset, 0);
    assert!(!record.offset_index.is_allocated());
    assert!(!record.key_log.is_allocated());
    assert!(record.key_log.block_ids.iter().all(|id| id.is_null()));
}

#[test]
fn test_empty_queue_reports_nothing_and_completes_once() {
    let (store, root) = setup_queue(4096);

    let receiver = query(&store, root, 0, u32::MAX);
    assert!(receiver.keys().is_empty());
    assert_eq!(receiver.completions(), 1);

    let stats = {
        let txn = store.begin_read();
        delete_queue::inspect(&txn, root).unwrap()
    };
    assert_eq!(stats.index_entries, 0);
    assert_eq!(stats.key_log_bytes, 0);
    assert_eq!(stats.first_timestamp, None);
}

// =============================================================================
// Enqueue Tests
// =============================================================================

#[test]
fn test_enqueue_builds_index_and_log() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 100, b"a");
    enqueue(&store, root, 100, b"b");
    enqueue(&store, root, 105, b"c");

    assert_eq!(
        index(&store, root),
        vec![IndexEntry::new(ts(100), 0), IndexEntry::new(ts(105), 4)]
    );

    let txn = store.begin_read();
    let stats = delete_queue::inspect(&txn, root).unwrap();
    assert_eq!(stats.key_log_bytes, 6);
    assert_eq!(stats.first_timestamp, Some(ts(100)));
    assert_eq!(stats.last_timestamp, Some(ts(105)));
}

#[test]
fn test_out_of_order_timestamp_is_clamped() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 100, b"a");
    enqueue(&store, root, 90, b"b");

    assert_eq!(index(&store, root), vec![IndexEntry::new(ts(100), 0)]);
    assert_eq!(keys(&store, root, 100, 101), vec![k("a"), k("b")]);
    assert!(keys(&store, root, 90, 100).is_empty());
}

#[test]
fn test_max_length_key() {
    let (store, root) = setup_queue(64);
    let long = vec![0xAB; StoreKey::MAX_SIZE];
    enqueue(&store, root, 1, &long);
    enqueue(&store, root, 2, b"");

    assert_eq!(keys(&store, root, 0, u32::MAX), vec![long, Vec::new()]);
    assert!(matches!(
        StoreKey::try_from(&[0u8; 256][..]),
        Err(DelQueueError::KeyTooLong(256))
    ));
}

#[test]
fn test_enqueue_rejects_foreign_root() {
    let (store, _root) = setup_queue(4096);
    let txn = store.begin_write();
    let other = txn.allocate_block().unwrap();

    let result = delete_queue::enqueue(&txn, other, ts(1), &StoreKey::try_from("k").unwrap());
    assert!(matches!(result, Err(DelQueueError::InvalidMagic { .. })));
}

// =============================================================================
// Range Query Tests
// =============================================================================

#[test]
fn test_range_query_windows() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 100, b"a");
    enqueue(&store, root, 100, b"b");
    enqueue(&store, root, 105, b"c");

    assert_eq!(keys(&store, root, 100, 105), vec![k("a"), k("b")]);
    assert_eq!(keys(&store, root, 105, u32::MAX), vec![k("c")]);
    assert_eq!(keys(&store, root, 0, u32::MAX), vec![k("a"), k("b"), k("c")]);
    assert_eq!(keys(&store, root, 101, 200), vec![k("c")]);
    assert!(keys(&store, root, 0, 100).is_empty());
    assert!(keys(&store, root, 106, 200).is_empty());
    assert!(keys(&store, root, 100, 100).is_empty());
}

#[test]
fn test_range_query_returns_delivered_count() {
    let (store, root) = setup_queue(4096);
    for i in 0..10u32 {
        enqueue(&store, root, 10 + i / 3, format!("key-{}", i).as_bytes());
    }

    let txn = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    let delivered = delete_queue::range_query(&txn, root, ts(11), ts(13), &mut receiver).unwrap();
    assert_eq!(delivered, 6);
    assert_eq!(receiver.keys()[0], k("key-3"));
    assert_eq!(receiver.keys()[5], k("key-8"));
}

#[test]
fn test_reversed_range_is_empty() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 100, b"a");
    enqueue(&store, root, 105, b"c");

    let receiver = query(&store, root, 200, 100);
    assert!(receiver.keys().is_empty());
    assert_eq!(receiver.completions(), 1);
}

#[test]
fn test_range_query_spans_many_blocks() {
    let (store, root) = setup_queue(64);
    let mut expected = Vec::new();
    for i in 0..300u32 {
        let key = format!("document/{:05}", i).into_bytes();
        enqueue(&store, root, 1000 + i / 7, &key);
        if (1010..1020).contains(&(1000 + i / 7)) {
            expected.push(key);
        }
    }

    assert_eq!(keys(&store, root, 1010, 1020), expected);
    assert_eq!(keys(&store, root, 0, u32::MAX).len(), 300);
}

#[test]
fn test_concurrent_readers_share_root() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 7, b"a");

    let txn_a = store.begin_read();
    let _held = txn_a.acquire(root, Access::Read).unwrap();

    let txn_b = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    delete_queue::range_query(&txn_b, root, ts(0), ts(10), &mut receiver).unwrap();
    assert_eq!(receiver.keys(), &[k("a")]);
}

// =============================================================================
// Failure Path Tests
// =============================================================================

#[test]
fn test_misaligned_index_is_corruption_and_completes() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 1, b"a");
    tamper_root(&store, root, |record| record.offset_index.size = 13);

    let txn = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    let result = delete_queue::range_query(&txn, root, ts(0), ts(10), &mut receiver);

    assert!(matches!(result, Err(DelQueueError::Corruption(_))));
    assert!(receiver.keys().is_empty());
    assert_eq!(receiver.completions(), 1);
}

#[test]
fn test_overrunning_key_length_is_corruption_and_completes() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 1, b"hello");

    let leaf = {
        let txn = store.begin_read();
        let guard = txn.acquire(root, Access::Read).unwrap();
        RootRecord::decode(guard.data()).unwrap().key_log.block_ids[0]
    };
    {
        let txn = store.begin_write();
        txn.acquire(leaf, Access::Write).unwrap().data_mut().unwrap()[0] = 200;
        txn.commit().unwrap();
    }

    let txn = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    let result = delete_queue::range_query(&txn, root, ts(0), ts(10), &mut receiver);

    assert!(matches!(result, Err(DelQueueError::Corruption(_))));
    assert_eq!(receiver.completions(), 1);
}

#[test]
fn test_bad_magic_still_completes() {
    let (store, root) = setup_queue(4096);
    {
        let txn = store.begin_write();
        txn.acquire(root, Access::Write).unwrap().data_mut().unwrap()[0] = b'X';
        txn.commit().unwrap();
    }

    let receiver_result = {
        let txn = store.begin_read();
        let mut receiver = CollectingReceiver::new();
        let result = delete_queue::range_query(&txn, root, ts(0), ts(10), &mut receiver);
        (result, receiver.completions())
    };
    assert!(matches!(receiver_result.0, Err(DelQueueError::InvalidMagic { .. })));
    assert_eq!(receiver_result.1, 1);
}

#[test]
fn test_lock_timeout_completes_once() {
    let (store, root) = setup_queue(4096);

    let writer = store.begin_write();
    let _held = writer.acquire(root, Access::Write).unwrap();

    let reader = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    let result = delete_queue::range_query(&reader, root, ts(0), ts(10), &mut receiver);

    assert!(matches!(result, Err(DelQueueError::LockTimeout { .. })));
    assert_eq!(receiver.completions(), 1);
}

#[test]
fn test_enqueue_in_read_transaction_is_rejected() {
    let (store, root) = setup_queue(4096);
    let txn = store.begin_read();
    let result = delete_queue::enqueue(&txn, root, ts(1), &StoreKey::try_from("k").unwrap());
    assert!(matches!(result, Err(DelQueueError::ReadOnlyTransaction)));
}

#[test]
fn test_dropped_transaction_leaves_queue_untouched() {
    let (store, root) = setup_queue(64);
    enqueue(&store, root, 1, b"kept");
    let blocks_before = store.block_count();

    {
        let txn = store.begin_write();
        for i in 0..50u32 {
            let key = StoreKey::try_from(format!("discarded-{}", i).as_str()).unwrap();
            delete_queue::enqueue(&txn, root, ts(2 + i), &key).unwrap();
        }
        // dropped without commit
    }

    assert_eq!(index(&store, root), vec![IndexEntry::new(ts(1), 0)]);
    assert_eq!(keys(&store, root, 0, u32::MAX), vec![k("kept")]);
    assert_eq!(
        store.block_count() - store.free_block_count(),
        blocks_before
    );

    // Freed blocks are reused by the next enqueue
    enqueue(&store, root, 3, b"next");
    assert_eq!(keys(&store, root, 0, u32::MAX), vec![k("kept"), k("next")]);
}

#[test]
fn test_failed_enqueue_rolls_back_with_transaction() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 1, b"a");
    tamper_root(&store, root, |record| record.offset_index.size = 13);

    let txn = store.begin_write();
    let result = delete_queue::enqueue(&txn, root, ts(2), &StoreKey::try_from("b").unwrap());
    assert!(matches!(result, Err(DelQueueError::Corruption(_))));
    txn.rollback().unwrap();

    let txn = store.begin_read();
    let guard = txn.acquire(root, Access::Read).unwrap();
    let record = RootRecord::decode(guard.data()).unwrap();
    assert_eq!(record.offset_index.size, 13);
    assert_eq!(record.key_log.size, 2);
}

// =============================================================================
// Transaction Isolation Tests
// =============================================================================

#[test]
fn test_uncommitted_enqueue_blocks_other_transactions() {
    let (store, root) = setup_queue(4096);
    enqueue(&store, root, 1, b"a");

    let first = store.begin_write();
    delete_queue::enqueue(&first, root, ts(2), &StoreKey::try_from("dropped").unwrap()).unwrap();

    let second = store.begin_write();
    let result = delete_queue::enqueue(&second, root, ts(3), &StoreKey::try_from("b").unwrap());
    assert!(matches!(result, Err(DelQueueError::LockTimeout { .. })));

    let reader = store.begin_read();
    let mut receiver = CollectingReceiver::new();
    let result = delete_queue::range_query(&reader, root, ts(0), ts(10), &mut receiver);
    assert!(matches!(result, Err(DelQueueError::LockTimeout { .. })));
    assert!(receiver.keys().is_empty());

    drop(second);
    drop(first);
    enqueue(&store, root, 3, b"b");
    assert_eq!(keys(&store, root, 0, u32::MAX), vec![k("a"), k("b")]);
}

#[test]
fn test_dropped_writer_does_not_erase_waiting_commit() {
    let (store, root) = setup_queue_with_timeout(64, 5_000);
    enqueue(&store, root, 1, b"a");

    let first = store.begin_write();
    for i in 0..8u32 {
        let key = StoreKey::try_from(format!("dropped-{}", i).as_str()).unwrap();
        delete_queue::enqueue(&first, root, ts(2 + i), &key).unwrap();
    }

    let (started_tx, started_rx) = channel::bounded(1);
    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            started_tx.send(()).unwrap();
            let txn = store.begin_write();
            let key = StoreKey::try_from("committed").unwrap();
            delete_queue::enqueue(&txn, root, ts(20), &key).unwrap();
            txn.commit().unwrap();
        });

        started_rx.recv().unwrap();
        drop(first);
        waiter.join().unwrap();
    });

    assert_eq!(keys(&store, root, 0, u32::MAX), vec![k("a"), k("committed")]);
    assert_eq!(
        index(&store, root),
        vec![IndexEntry::new(ts(1), 0), IndexEntry::new(ts(20), 2)]
    );
}
