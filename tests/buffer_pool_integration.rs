//! Integration tests for the buffer pool.
//!
//! These tests drive whole transactions through a `Database` and check
//! what ends up in the cache and on disk.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use heapstore::storage::page::HeapPage;
use heapstore::{Database, Error, PageId, Permissions, StorageConfig, TransactionId, Tuple};
use tempfile::tempdir;

const PAGE: usize = 256;
const TUPLE: usize = 8;

fn slots() -> usize {
    HeapPage::slots_per_page(PAGE, TUPLE)
}

fn create_db(pool_pages: usize) -> (Database, u32, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let config = StorageConfig::new(pool_pages).with_page_size(PAGE);
    let db = Database::open(config, dir.path().join("wal.log")).unwrap();
    let table = db.add_table(dir.path().join("table.dat"), "table", TUPLE).unwrap();
    (db, table, dir)
}

/// Insert one tuple per transaction, committing each.
fn insert_committed(db: &Database, table: u32, values: impl IntoIterator<Item = i32>) -> Vec<Tuple> {
    values
        .into_iter()
        .map(|v| {
            let tid = TransactionId::next();
            let mut tuple = Tuple::from_i32s(&[v, v * 10]);
            db.buffer_pool().insert_tuple(tid, table, &mut tuple).unwrap();
            db.buffer_pool().transaction_complete(tid, true).unwrap();
            tuple
        })
        .collect()
}

fn scan_values(db: &Database, table: u32) -> Vec<i32> {
    let tid = TransactionId::next();
    let file = db.catalog().database_file(table).unwrap();
    let values = file
        .iter(db.buffer_pool(), tid)
        .map(|t| t.unwrap().i32_at(0).unwrap())
        .collect();
    db.buffer_pool().transaction_complete(tid, true).unwrap();
    values
}

/// Capacity 2; read P1, P2, P1, P3: P2 is the victim.
#[test]
fn test_lru_eviction_order() {
    let (db, table, _dir) = create_db(2);
    let file = db.catalog().database_file(table).unwrap();
    for n in 0..4 {
        file.allocate_page(n).unwrap();
    }

    let pool = db.buffer_pool();
    let tid = TransactionId::next();
    let p = |n| PageId::new(table, n);

    pool.get_page(tid, p(1), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(2), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(1), Permissions::ReadOnly).unwrap();
    pool.get_page(tid, p(3), Permissions::ReadOnly).unwrap();

    assert!(pool.is_cached(p(1)));
    assert!(!pool.is_cached(p(2)));
    assert!(pool.is_cached(p(3)));
    assert_eq!(pool.cached_pages(), 2);
}

/// Dirty pages are never evicted; a full, all-dirty pool refuses new pages.
#[test]
fn test_no_steal() {
    let (db, table, _dir) = create_db(2);
    let file = db.catalog().database_file(table).unwrap();
    for n in 0..3 {
        file.allocate_page(n).unwrap();
    }
    let pool = db.buffer_pool();

    // Dirty pages 0 and 1 under one transaction.
    let t1 = TransactionId::next();
    for _ in 0..(slots() + 1) {
        let mut tuple = Tuple::from_i32s(&[1, 1]);
        pool.insert_tuple(t1, table, &mut tuple).unwrap();
    }

    let t2 = TransactionId::next();
    let err = pool
        .get_page(t2, PageId::new(table, 2), Permissions::ReadOnly)
        .unwrap_err();
    assert!(matches!(err, Error::AllPagesDirty { .. }));
    assert!(pool.is_cached(PageId::new(table, 0)));
    assert!(pool.is_cached(PageId::new(table, 1)));

    // Nothing uncommitted reached the disk.
    let on_disk = file.read_page(PageId::new(table, 0)).unwrap();
    assert_eq!(on_disk.num_empty_slots(), on_disk.num_slots());

    // After commit the pages are clean and evictable again.
    pool.transaction_complete(t1, true).unwrap();
    pool.get_page(t2, PageId::new(table, 2), Permissions::ReadOnly).unwrap();
    pool.transaction_complete(t2, true).unwrap();
}

/// Committed data is on disk: a fresh pool reads it back.
#[test]
fn test_commit_durability() {
    let (mut db, table, _dir) = create_db(4);
    insert_committed(&db, table, 0..5);

    let pool = db.reset_buffer_pool(4).unwrap();
    assert_eq!(pool.cached_pages(), 0);

    assert_eq!(scan_values(&db, table), vec![0, 1, 2, 3, 4]);
    assert_eq!(db.log().records().unwrap().len(), 5);
}

/// Abort puts the cached page back to its on-disk contents.
#[test]
fn test_abort_rollback() {
    let (db, table, _dir) = create_db(4);
    let stored = insert_committed(&db, table, [7]);
    let pool = db.buffer_pool();

    let tid = TransactionId::next();
    pool.delete_tuple(tid, &stored[0]).unwrap();
    for v in 100..103 {
        let mut tuple = Tuple::from_i32s(&[v, v]);
        pool.insert_tuple(tid, table, &mut tuple).unwrap();
    }

    let pid = PageId::new(table, 0);
    let page = pool.get_page(tid, pid, Permissions::ReadOnly).unwrap();
    assert!(page.read().is_dirty());

    pool.transaction_complete(tid, false).unwrap();

    let file = db.catalog().database_file(table).unwrap();
    let on_disk = file.read_page_data(pid).unwrap();
    assert_eq!(page.read().page_data(), on_disk.as_slice());
    assert!(!page.read().is_dirty());
    assert!(!pool.holds_lock(tid, pid));

    assert_eq!(scan_values(&db, table), vec![7]);
}

/// Inserts fill the first page with room; no page is added while one has
/// a free slot.
#[test]
fn test_insert_placement() {
    let (db, table, _dir) = create_db(4);
    let file = db.catalog().database_file(table).unwrap();

    let t1 = TransactionId::next();
    let mut stored = Vec::new();
    for v in 0..=slots() as i32 {
        let mut tuple = Tuple::from_i32s(&[v, 0]);
        db.buffer_pool().insert_tuple(t1, table, &mut tuple).unwrap();
        stored.push(tuple);
    }
    db.buffer_pool().transaction_complete(t1, true).unwrap();

    assert_eq!(file.page_count().unwrap(), 2);
    let last = stored.last().unwrap().record_id().unwrap();
    assert_eq!(last.page_id, PageId::new(table, 1));
    assert_eq!(last.slot, 0);

    let t2 = TransactionId::next();
    db.buffer_pool().delete_tuple(t2, &stored[5]).unwrap();
    db.buffer_pool().transaction_complete(t2, true).unwrap();

    let t3 = TransactionId::next();
    let mut tuple = Tuple::from_i32s(&[-1, -1]);
    db.buffer_pool().insert_tuple(t3, table, &mut tuple).unwrap();
    db.buffer_pool().transaction_complete(t3, true).unwrap();

    let rid = tuple.record_id().unwrap();
    assert_eq!(rid.page_id, PageId::new(table, 0));
    assert_eq!(rid.slot, 5);
    assert_eq!(file.page_count().unwrap(), 2);
}

/// Data survives many eviction cycles through a tiny pool.
#[test]
fn test_data_persistence_across_evictions() {
    let (db, table, _dir) = create_db(2);
    let count = slots() as i32 * 3 + 4;

    insert_committed(&db, table, 0..count);

    let file = db.catalog().database_file(table).unwrap();
    assert_eq!(file.page_count().unwrap(), 4);

    let values = scan_values(&db, table);
    assert_eq!(values, (0..count).collect::<Vec<_>>());
    assert!(db.buffer_pool().stats().snapshot().evictions > 0);
    assert!(db.buffer_pool().cached_pages() <= 2);
}

/// Scans can be rewound and closed.
#[test]
fn test_heap_file_iterator() {
    let (db, table, _dir) = create_db(4);
    insert_committed(&db, table, 0..3);

    let tid = TransactionId::next();
    let file = db.catalog().database_file(table).unwrap();
    let mut iter = file.iter(db.buffer_pool(), tid);

    assert_eq!(iter.next().unwrap().unwrap().i32_at(0), Some(0));
    iter.rewind();
    assert_eq!(iter.by_ref().count(), 3);
    assert!(iter.next().is_none());

    iter.rewind();
    iter.next().unwrap().unwrap();
    iter.close();
    assert!(iter.next().is_none());

    // Closing doesn't release locks.
    assert!(db.buffer_pool().holds_lock(tid, PageId::new(table, 0)));
    db.buffer_pool().transaction_complete(tid, true).unwrap();
}

/// A page the scanning transaction appends mid-scan is visited too.
#[test]
fn test_iterator_sees_appended_page() {
    let (db, table, _dir) = create_db(4);
    insert_committed(&db, table, 0..slots() as i32);
    let file = db.catalog().database_file(table).unwrap();
    assert_eq!(file.page_count().unwrap(), 1);

    let pool = db.buffer_pool();
    let tid = TransactionId::next();
    let mut iter = file.iter(pool, tid);
    assert_eq!(iter.next().unwrap().unwrap().i32_at(0), Some(0));

    let mut tuple = Tuple::from_i32s(&[-1, -10]);
    pool.insert_tuple(tid, table, &mut tuple).unwrap();
    assert_eq!(tuple.record_id().unwrap().page_id, PageId::new(table, 1));

    let rest: Vec<i32> = iter.map(|t| t.unwrap().i32_at(0).unwrap()).collect();
    assert_eq!(rest.len(), slots());
    assert_eq!(rest.last(), Some(&-1));
    pool.transaction_complete(tid, true).unwrap();
}

/// Deleting a tuple of another table is refused.
#[test]
fn test_delete_wrong_table() {
    let (db, table, dir) = create_db(4);
    let other = db.add_table(dir.path().join("other.dat"), "other", TUPLE).unwrap();
    let stored = insert_committed(&db, table, [1]);

    let tid = TransactionId::next();
    let file = db.catalog().database_file(other).unwrap();
    let err = file.delete_tuple(db.buffer_pool(), tid, &stored[0]).unwrap_err();
    assert!(matches!(err, Error::WrongTable { .. }));

    let err = db
        .buffer_pool()
        .delete_tuple(tid, &Tuple::from_i32s(&[1, 1]))
        .unwrap_err();
    assert!(matches!(err, Error::MissingRecordId));
}

/// Concurrent inserting transactions all land, each exactly once.
#[test]
fn test_concurrent_inserts() {
    let (db, table, _dir) = create_db(8);
    let pool = Arc::clone(db.buffer_pool());

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for i in 0..20 {
                    let value = worker * 100 + i;
                    loop {
                        let tid = TransactionId::next();
                        let mut tuple = Tuple::from_i32s(&[value, worker]);
                        match pool.insert_tuple(tid, table, &mut tuple) {
                            Ok(()) => {
                                pool.transaction_complete(tid, true).unwrap();
                                break;
                            }
                            // Already aborted by the pool; retry.
                            Err(e) if e.is_abort() => continue,
                            Err(e) => panic!("insert failed: {e}"),
                        }
                    }
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    let values: HashSet<i32> = scan_values(&db, table).into_iter().collect();
    assert_eq!(values.len(), 80);
    for worker in 0..4 {
        for i in 0..20 {
            assert!(values.contains(&(worker * 100 + i)));
        }
    }
}

/// Stats reflect hits, misses and completed transactions.
#[test]
fn test_stats_accuracy() {
    let (db, table, _dir) = create_db(4);
    insert_committed(&db, table, [1]);
    let pool = db.buffer_pool();
    pool.stats().reset();

    let tid = TransactionId::next();
    for _ in 0..5 {
        pool.get_page(tid, PageId::new(table, 0), Permissions::ReadOnly).unwrap();
    }
    pool.transaction_complete(tid, false).unwrap();

    let stats = pool.stats().snapshot();
    assert_eq!(stats.cache_hits, 5);
    assert_eq!(stats.cache_misses, 0);
    assert_eq!(stats.aborts, 1);
    assert_eq!(stats.commits, 0);
}
