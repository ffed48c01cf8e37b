use std::sync::Arc;

use palletdb::buffer::{ParallelBufferPool, HEADER_PAGE_ID, PAGE_SIZE};
use palletdb::config::{BTreeConfig, BufferPoolConfig, HashTableConfig};
use palletdb::storage::disk_manager::DiskManager;
use palletdb::storage::index::comparator::{
    decode_int_key, encode_int_key, identity_hash_function,
};
use palletdb::storage::index::{BPlusTreeIndex, ExtendibleHashTable};
use palletdb::storage::page::RecordId;
use palletdb::transaction::Transaction;
use tempfile::TempDir;

fn setup_pool(pool_size: usize, num_instances: usize) -> (TempDir, Arc<ParallelBufferPool>) {
    let temp_dir = TempDir::new().unwrap();
    let disk_manager = Arc::new(DiskManager::try_new(temp_dir.path().join("test.db")).unwrap());
    let pool = Arc::new(ParallelBufferPool::new(
        BufferPoolConfig {
            pool_size,
            num_instances,
        },
        disk_manager,
    ));
    (temp_dir, pool)
}

fn setup_tree(pool: &Arc<ParallelBufferPool>) -> BPlusTreeIndex {
    let (page_id, _frame) = pool.new_page().unwrap().unwrap();
    assert_eq!(page_id, HEADER_PAGE_ID);
    assert!(pool.unpin_page(page_id, true));
    BPlusTreeIndex::new(
        "scenario_index",
        pool.clone(),
        BTreeConfig {
            leaf_max_size: 3,
            internal_max_size: 3,
        },
    )
}

fn rid_for(value: i64) -> RecordId {
    RecordId::new(value as i32, value as u32)
}

fn tree_contents(index: &BPlusTreeIndex) -> Vec<i64> {
    let mut iterator = index.begin().unwrap();
    let mut out = vec![];
    while let Some((key, _rid)) = iterator.next().unwrap() {
        out.push(decode_int_key(&key).unwrap());
    }
    out
}

// S1: sequential insert splits the root; iteration stays sorted.
#[test]
fn scenario_sequential_insert_and_scan() {
    let (_tmp, pool) = setup_pool(100, 1);
    let index = setup_tree(&pool);
    let mut txn = Transaction::new();
    for value in 1..=5 {
        assert!(index
            .insert(&encode_int_key(value), rid_for(value), &mut txn)
            .unwrap());
    }
    assert_eq!(tree_contents(&index), vec![1, 2, 3, 4, 5]);
}

// S2: reverse insert, point delete, then scan around the hole.
#[test]
fn scenario_reverse_insert_and_point_delete() {
    let (_tmp, pool) = setup_pool(100, 1);
    let index = setup_tree(&pool);
    let mut txn = Transaction::new();
    for value in [5, 4, 3, 2, 1] {
        assert!(index
            .insert(&encode_int_key(value), rid_for(value), &mut txn)
            .unwrap());
    }
    index.remove(&encode_int_key(3), &mut txn).unwrap();
    assert_eq!(index.get_value(&encode_int_key(3)).unwrap(), None);
    assert_eq!(tree_contents(&index), vec![1, 2, 4, 5]);
}

// S3: removals shrink the tree down to a single root leaf.
#[test]
fn scenario_remove_back_to_root_leaf() {
    let (_tmp, pool) = setup_pool(100, 1);
    let index = setup_tree(&pool);
    let mut txn = Transaction::new();
    for value in 1..=10 {
        assert!(index
            .insert(&encode_int_key(value), rid_for(value), &mut txn)
            .unwrap());
    }
    for value in 1..=8 {
        index.remove(&encode_int_key(value), &mut txn).unwrap();
    }
    assert_eq!(tree_contents(&index), vec![9, 10]);
    assert!(!index.is_empty());
}

// S4: identity-hashed inserts drive one split and then another.
#[test]
fn scenario_hash_split() {
    let (_tmp, pool) = setup_pool(100, 1);
    let table = ExtendibleHashTable::try_new_with(
        pool,
        8,
        HashTableConfig {
            bucket_max_size: Some(4),
        },
        |a, b| a.cmp(b),
        identity_hash_function,
    )
    .unwrap();

    for value in 0..=4u64 {
        assert!(table
            .insert(&value.to_le_bytes(), rid_for(value as i64))
            .unwrap());
    }
    assert_eq!(table.get_global_depth().unwrap(), 1);
    for value in 0..=4u64 {
        assert_eq!(
            table.get_value(&value.to_le_bytes()).unwrap(),
            vec![rid_for(value as i64)]
        );
    }
    table.verify_integrity().unwrap();
}

// S5: emptying one bucket merges it with its image and shrinks the
// directory.
#[test]
fn scenario_hash_merge_and_shrink() {
    let (_tmp, pool) = setup_pool(100, 1);
    let table = ExtendibleHashTable::try_new_with(
        pool,
        8,
        HashTableConfig {
            bucket_max_size: Some(4),
        },
        |a, b| a.cmp(b),
        identity_hash_function,
    )
    .unwrap();

    for value in 0..=4u64 {
        assert!(table
            .insert(&value.to_le_bytes(), rid_for(value as i64))
            .unwrap());
    }
    assert_eq!(table.get_global_depth().unwrap(), 1);

    assert!(table.remove(&1u64.to_le_bytes(), rid_for(1)).unwrap());
    assert!(table.remove(&3u64.to_le_bytes(), rid_for(3)).unwrap());
    assert_eq!(table.get_global_depth().unwrap(), 0);
    table.verify_integrity().unwrap();
}

// S6: a tiny pool rejects allocation while everything is pinned, then
// evicts the unpinned page (writing it out) and reads it back on fetch.
#[test]
fn scenario_small_pool_eviction() {
    let (_tmp, pool) = setup_pool(3, 1);

    let (id_a, frame_a) = pool.new_page().unwrap().unwrap();
    let (_id_b, _frame_b) = pool.new_page().unwrap().unwrap();
    let (_id_c, _frame_c) = pool.new_page().unwrap().unwrap();

    assert!(pool.new_page().unwrap().is_none());

    frame_a.data_lock().write()[100] = 0xEE;
    assert!(pool.unpin_page(id_a, true));

    let (id_d, _frame_d) = pool.new_page().unwrap().unwrap();
    assert_ne!(id_a, id_d);

    // A was evicted; fetching reloads its bytes from disk.
    assert!(pool.unpin_page(id_d, false));
    let frame_a = pool.fetch_page(id_a).unwrap().unwrap();
    assert_eq!(frame_a.data_lock().read()[100], 0xEE);
    assert!(pool.unpin_page(id_a, false));
}

// Both indexes share one sharded pool and one db file.
#[test]
fn scenario_tree_and_hash_share_pool() {
    let (_tmp, pool) = setup_pool(200, 3);
    let index = setup_tree(&pool);
    let table = ExtendibleHashTable::try_new(
        pool.clone(),
        8,
        HashTableConfig {
            bucket_max_size: Some(8),
        },
    )
    .unwrap();

    let mut txn = Transaction::new();
    for value in 0..100 {
        assert!(index
            .insert(&encode_int_key(value), rid_for(value), &mut txn)
            .unwrap());
        assert!(table
            .insert(&(value as u64).to_le_bytes(), rid_for(value))
            .unwrap());
    }
    for value in 0..100 {
        assert_eq!(
            index.get_value(&encode_int_key(value)).unwrap(),
            Some(rid_for(value))
        );
        assert_eq!(
            table.get_value(&(value as u64).to_le_bytes()).unwrap(),
            vec![rid_for(value)]
        );
    }
    assert_eq!(tree_contents(&index), (0..100).collect::<Vec<_>>());
    table.verify_integrity().unwrap();
    pool.flush_all_pages().unwrap();
}

// Dirty pages written through the pool survive a flush and re-read from a
// fresh pool over the same file.
#[test]
fn scenario_flush_and_reload() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let page_id;
    {
        let disk_manager = Arc::new(DiskManager::try_new(&db_path).unwrap());
        let pool = Arc::new(ParallelBufferPool::new(
            BufferPoolConfig {
                pool_size: 10,
                num_instances: 2,
            },
            disk_manager,
        ));
        let mut guard = pool.new_page_write().unwrap();
        page_id = guard.page_id();
        guard.data_mut()[..4].copy_from_slice(b"pers");
        drop(guard);
        pool.flush_all_pages().unwrap();
    }

    let disk_manager = Arc::new(DiskManager::try_new(&db_path).unwrap());
    let mut buf = vec![0u8; PAGE_SIZE];
    disk_manager.read_page(page_id, &mut buf).unwrap();
    assert_eq!(&buf[..4], b"pers");

    // And a new pool over the same file keeps allocating fresh ids.
    let pool = Arc::new(ParallelBufferPool::new(
        BufferPoolConfig {
            pool_size: 10,
            num_instances: 2,
        },
        disk_manager,
    ));
    let (new_id, _frame) = pool.new_page().unwrap().unwrap();
    assert!(new_id > page_id);
}
