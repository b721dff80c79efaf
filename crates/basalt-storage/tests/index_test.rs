//! Integration tests for the sequential index over the buffer manager.
//!
//! Covers page split and page removal across block boundaries, error paths
//! leaving the index untouched, randomized workloads, and persistence through
//! the disk manager.

use basalt_buffer::{BufferManager, BufferPoolConfig, MemoryStore};
use basalt_common::config::{AccessMode, IndexConfig};
use basalt_common::page::PageId;
use basalt_common::types::{AttrType, Value};
use basalt_common::BasaltError;
use basalt_storage::{
    open_index, DiskManager, DiskManagerConfig, SeqIndex, TupleId, MAX_TIDS_PER_ENTRY,
};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::tempdir;

const INDEX_FILE: u32 = 7;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn memory_buffer(page_size: usize, num_frames: usize) -> BufferManager {
    init_logger();
    let store = Arc::new(MemoryStore::new(page_size));
    BufferManager::new(BufferPoolConfig { num_frames }, store).unwrap()
}

fn tid(n: u32) -> TupleId {
    TupleId::new(PageId::new(1, n / 16), (n % 16) as u16)
}

fn int(k: i32) -> Value {
    Value::Int32(k)
}

fn page_keys(index: &mut SeqIndex<'_>, block: u32) -> Vec<Value> {
    index
        .page_entries(block)
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect()
}

fn all_keys(index: &mut SeqIndex<'_>) -> Vec<Value> {
    index.scan().unwrap().into_iter().map(|e| e.key).collect()
}

fn assert_sorted(index: &mut SeqIndex<'_>) {
    let keys = all_keys(index);
    assert!(
        keys.windows(2).all(|w| w[0] < w[1]),
        "keys out of order: {:?}",
        keys
    );
    for block in 0..index.page_count().unwrap() {
        if index.page_count().unwrap() > 1 {
            assert!(
                !index.page_entries(block).unwrap().is_empty(),
                "empty page {} in a multi-page index",
                block
            );
        }
    }
}

fn assert_matches_model(index: &mut SeqIndex<'_>, model: &BTreeMap<i32, Vec<TupleId>>) {
    assert_sorted(index);
    let scanned = index.scan().unwrap();
    assert_eq!(scanned.len(), model.len());
    for (entry, (k, tids)) in scanned.iter().zip(model.iter()) {
        assert_eq!(entry.key, int(*k));
        assert_eq!(&entry.tids, tids);
    }
    for (k, tids) in model {
        assert_eq!(&index.find(&int(*k)).unwrap(), tids);
    }
    assert_eq!(index.pin_depth(), 1);
}

// =============================================================================
// Split and removal
// =============================================================================

#[test]
fn test_split_two_entry_pages() {
    let buffer = memory_buffer(32, 3);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    assert_eq!(index.entries_per_page(), 2);

    let t1 = tid(1);
    let t2 = tid(2);
    let t3 = tid(3);
    index.insert(&int(1), t1).unwrap();
    index.insert(&int(2), t2).unwrap();
    index.insert(&int(3), t3).unwrap();

    assert_eq!(index.page_count().unwrap(), 2);
    assert_eq!(page_keys(&mut index, 0), vec![int(1)]);
    assert_eq!(page_keys(&mut index, 1), vec![int(2), int(3)]);
    assert_eq!(index.find(&int(2)).unwrap(), vec![t2]);
    assert_eq!(index.pin_depth(), 1);
}

#[test]
fn test_split_middle_page_preserves_followers() {
    let buffer = memory_buffer(32, 4);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    for k in (10..=60).step_by(10) {
        index.insert(&int(k), tid(k as u32)).unwrap();
    }
    let pages_before = index.page_count().unwrap();
    assert!(pages_before >= 3);

    // Ascending inserts leave one entry on every page but the last.
    assert_eq!(page_keys(&mut index, 1), vec![int(20)]);
    index.insert(&int(21), tid(21)).unwrap();
    assert_eq!(index.page_count().unwrap(), pages_before);

    // Block 1 is now a full page in the middle of the file.
    index.insert(&int(22), tid(22)).unwrap();
    assert_eq!(index.page_count().unwrap(), pages_before + 1);
    assert_eq!(page_keys(&mut index, 1), vec![int(20)]);
    assert_eq!(page_keys(&mut index, 2), vec![int(21), int(22)]);
    assert_sorted(&mut index);
    assert_eq!(index.find(&int(21)).unwrap(), vec![tid(21)]);
    assert_eq!(index.find(&int(22)).unwrap(), vec![tid(22)]);
    for k in (10..=60).step_by(10) {
        assert_eq!(index.find(&int(k)).unwrap(), vec![tid(k as u32)]);
    }
    assert_eq!(buffer.stats().locked_frames, 1);
}

#[test]
fn test_split_middle_page_with_three_frames() {
    let buffer = memory_buffer(32, 3);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    for k in [10, 20, 30, 40, 50, 25] {
        index.insert(&int(k), tid(k as u32)).unwrap();
    }
    assert_eq!(index.page_count().unwrap(), 4);
    assert_eq!(page_keys(&mut index, 1), vec![int(20), int(25)]);

    // Splitting block 1 shifts blocks 2 and 3 with only three frames.
    index.insert(&int(22), tid(22)).unwrap();
    assert_eq!(index.page_count().unwrap(), 5);
    assert_eq!(page_keys(&mut index, 1), vec![int(20), int(22)]);
    assert_eq!(page_keys(&mut index, 2), vec![int(25)]);
    assert_sorted(&mut index);

    assert_eq!(index.find(&int(50)).unwrap(), vec![tid(50)]);
    index.insert(&int(60), tid(60)).unwrap();
    for k in [10, 20, 22, 25, 30, 40, 50, 60] {
        assert_eq!(index.find(&int(k)).unwrap(), vec![tid(k as u32)]);
    }
    assert_eq!(buffer.stats().locked_frames, 1);
}

#[test]
fn test_remove_middle_page_closes_gap() {
    let buffer = memory_buffer(32, 4);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    for k in 1..=6 {
        index.insert(&int(k), tid(k as u32)).unwrap();
    }
    let pages_before = index.page_count().unwrap();

    let middle: Vec<Value> = page_keys(&mut index, 1);
    for key in &middle {
        let Value::Int32(k) = key else {
            panic!("unexpected key type");
        };
        index.remove(key, &[tid(*k as u32)]).unwrap();
    }

    assert_eq!(index.page_count().unwrap(), pages_before - 1);
    assert_sorted(&mut index);
    let remaining: Vec<Value> = (1..=6).map(int).filter(|k| !middle.contains(k)).collect();
    assert_eq!(all_keys(&mut index), remaining);
    assert_eq!(index.pin_depth(), 1);
}

#[test]
fn test_remove_last_entry_keeps_root_page() {
    let buffer = memory_buffer(32, 3);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    index.insert(&int(4), tid(4)).unwrap();
    index.remove(&int(4), &[tid(4)]).unwrap();

    assert_eq!(index.page_count().unwrap(), 1);
    assert!(index.find(&int(4)).unwrap().is_empty());

    index.insert(&int(5), tid(5)).unwrap();
    assert_eq!(index.find(&int(5)).unwrap(), vec![tid(5)]);
}

// =============================================================================
// Error paths
// =============================================================================

#[test]
fn test_failed_operations_leave_index_unchanged() {
    let buffer = memory_buffer(32, 4);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    for k in 1..=5 {
        index.insert(&int(k), tid(k as u32)).unwrap();
    }
    let before = index.scan().unwrap();

    assert!(matches!(
        index.insert(&int(3), tid(30)),
        Err(BasaltError::DuplicateKey)
    ));
    assert_eq!(index.pin_depth(), 1);
    assert!(matches!(
        index.remove(&int(9), &[tid(9)]),
        Err(BasaltError::KeyNotFound)
    ));
    assert_eq!(index.pin_depth(), 1);
    assert!(matches!(
        index.remove(&int(3), &[tid(3), tid(4)]),
        Err(BasaltError::UniqueViolation { requested: 2 })
    ));
    assert!(index.insert(&Value::from("abc"), tid(1)).is_err());

    assert_eq!(index.scan().unwrap(), before);
    assert_eq!(index.pin_depth(), 1);
    assert_eq!(buffer.stats().locked_frames, 1);
}

#[test]
fn test_entry_capacity_bound() {
    let buffer = memory_buffer(1024, 4);
    let config = IndexConfig::new(AttrType::Int32, false);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    assert_eq!(index.tids_per_entry(), MAX_TIDS_PER_ENTRY);

    for n in 0..MAX_TIDS_PER_ENTRY as u32 {
        index.insert(&int(42), tid(n)).unwrap();
    }
    let full = index.find(&int(42)).unwrap();
    assert_eq!(full.len(), MAX_TIDS_PER_ENTRY);

    let err = index.insert(&int(42), tid(500)).unwrap_err();
    assert!(matches!(err, BasaltError::EntryFull { max } if max == MAX_TIDS_PER_ENTRY));
    assert_eq!(index.find(&int(42)).unwrap(), full);
    assert_eq!(index.pin_depth(), 1);
}

#[test]
fn test_non_unique_remove_semantics() {
    let buffer = memory_buffer(1024, 4);
    let config = IndexConfig::new(AttrType::Int64, false);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    let key = Value::Int64(-3);
    for n in [5, 1, 9] {
        index.insert(&key, tid(n)).unwrap();
    }
    index.insert(&Value::Int64(10), tid(2)).unwrap();
    assert_eq!(index.find(&key).unwrap(), vec![tid(5), tid(1), tid(9)]);

    index.remove(&key, &[tid(9), tid(5)]).unwrap();
    assert_eq!(index.find(&key).unwrap(), vec![tid(1)]);

    assert!(matches!(
        index.remove(&key, &[tid(7)]),
        Err(BasaltError::NotAllRemoved { remaining: 1 })
    ));
    assert!(matches!(
        index.remove(&Value::Int64(0), &[tid(1)]),
        Err(BasaltError::KeyNotFound)
    ));

    index.remove(&key, &[tid(1)]).unwrap();
    assert!(index.find(&key).unwrap().is_empty());
    assert_eq!(all_keys(&mut index), vec![Value::Int64(10)]);
}

#[test]
fn test_non_unique_removals_across_pages() {
    let buffer = memory_buffer(512, 3);
    let config = IndexConfig::new(AttrType::Int32, false);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    assert_eq!(index.entries_per_page(), 2);
    let mut rng = StdRng::seed_from_u64(0xd00d);

    let mut keys: Vec<i32> = (0..24).collect();
    keys.shuffle(&mut rng);
    let mut model: BTreeMap<i32, Vec<TupleId>> = BTreeMap::new();
    let mut next = 0u32;
    for &k in &keys {
        for _ in 0..rng.random_range(1..=3) {
            index.insert(&int(k), tid(next)).unwrap();
            model.entry(k).or_default().push(tid(next));
            next += 1;
        }
    }
    assert!(index.page_count().unwrap() > 2);
    assert_matches_model(&mut index, &model);

    // The first key of block 1 is reached by backing off from the page before it.
    let first = page_keys(&mut index, 1)[0].clone();
    let Value::Int32(k) = first else {
        panic!("unexpected key type");
    };
    let tids = model.remove(&k).unwrap();
    index.remove(&first, &tids).unwrap();
    assert_matches_model(&mut index, &model);

    keys.shuffle(&mut rng);
    for &k in &keys {
        let Some(tids) = model.get(&k).cloned() else {
            continue;
        };
        let pages_before = index.page_count().unwrap();

        if tids.len() > 1 {
            index.remove(&int(k), &tids[..1]).unwrap();
            model.insert(k, tids[1..].to_vec());
            assert_matches_model(&mut index, &model);
            assert_eq!(index.page_count().unwrap(), pages_before);
        }

        let rest = model.remove(&k).unwrap();
        index.remove(&int(k), &rest).unwrap();
        assert_matches_model(&mut index, &model);
        let pages = index.page_count().unwrap();
        assert!(
            pages == pages_before || pages + 1 == pages_before,
            "page count went from {} to {}",
            pages_before,
            pages
        );
    }

    assert_eq!(index.page_count().unwrap(), 1);
    assert!(index.scan().unwrap().is_empty());
}

#[test]
fn test_read_handles_share_root() {
    let buffer = memory_buffer(64, 4);
    let mut config = IndexConfig::new(AttrType::Int32, true);
    {
        let mut writer = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
        writer.insert(&int(1), tid(1)).unwrap();
        writer.close().unwrap();
    }

    config.access = AccessMode::Read;
    let mut first = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    let mut second = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    assert_eq!(first.find(&int(1)).unwrap(), vec![tid(1)]);
    assert_eq!(second.find(&int(1)).unwrap(), vec![tid(1)]);

    // A shared root held by another handle blocks the upgrade.
    assert!(matches!(
        first.insert(&int(2), tid(2)),
        Err(BasaltError::LockConflict { .. })
    ));
    assert_eq!(first.pin_depth(), 1);
}

// =============================================================================
// Factory
// =============================================================================

#[test]
fn test_open_index_factory() {
    let buffer = memory_buffer(1024, 4);
    let config = IndexConfig::new(AttrType::Char(8), false);
    let mut index = open_index(&buffer, INDEX_FILE, &config).unwrap();

    assert_eq!(index.key_type(), AttrType::Char(8));
    assert!(!index.is_unique());

    index.insert(&Value::from("pear"), tid(1)).unwrap();
    index.insert(&Value::from("apple"), tid(2)).unwrap();
    index.insert(&Value::from("pear"), tid(3)).unwrap();
    assert_eq!(index.find(&Value::from("pear")).unwrap(), vec![tid(1), tid(3)]);

    index.remove(&Value::from("apple"), &[tid(2)]).unwrap();
    assert!(index.find(&Value::from("apple")).unwrap().is_empty());
}

// =============================================================================
// Randomized workloads
// =============================================================================

#[test]
fn test_shuffled_workload_matches_model() {
    let buffer = memory_buffer(64, 8);
    let config = IndexConfig::new(AttrType::Int32, true);
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut keys: Vec<i32> = (0..300).collect();
    keys.shuffle(&mut rng);
    let mut model = BTreeMap::new();
    for &k in &keys {
        index.insert(&int(k), tid(k as u32)).unwrap();
        model.insert(k, tid(k as u32));
    }
    assert_sorted(&mut index);

    keys.shuffle(&mut rng);
    for &k in keys.iter().take(200) {
        index.remove(&int(k), &[tid(k as u32)]).unwrap();
        model.remove(&k);
    }
    assert_sorted(&mut index);

    let expected: Vec<Value> = model.keys().map(|&k| int(k)).collect();
    assert_eq!(all_keys(&mut index), expected);
    for (k, t) in &model {
        assert_eq!(index.find(&int(*k)).unwrap(), vec![*t]);
    }
    for &k in keys.iter().take(200) {
        assert!(index.find(&int(k)).unwrap().is_empty());
    }
    assert_eq!(index.pin_depth(), 1);
    assert_eq!(buffer.stats().locked_frames, 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_inserts_stay_sorted_and_findable(
        keys in proptest::collection::vec(-1000i32..1000, 1..80),
    ) {
        let buffer = memory_buffer(1024, 6);
        let config = IndexConfig::new(AttrType::Int32, false);
        let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

        let mut model: BTreeMap<i32, Vec<TupleId>> = BTreeMap::new();
        for (n, &k) in keys.iter().enumerate() {
            let t = tid(n as u32);
            let tids = model.entry(k).or_default();
            let result = index.insert(&int(k), t);
            if tids.len() < index.tids_per_entry() {
                prop_assert!(result.is_ok());
                tids.push(t);
            } else {
                let entry_full = matches!(result, Err(BasaltError::EntryFull { .. }));
                prop_assert!(entry_full);
            }
        }

        let scanned = index.scan().unwrap();
        prop_assert_eq!(scanned.len(), model.len());
        for (entry, (k, tids)) in scanned.iter().zip(model.iter()) {
            prop_assert_eq!(&entry.key, &int(*k));
            prop_assert_eq!(&entry.tids, tids);
        }
        for (k, tids) in &model {
            prop_assert_eq!(&index.find(&int(*k)).unwrap(), tids);
        }
        prop_assert_eq!(index.pin_depth(), 1);
    }
}

// =============================================================================
// Persistence
// =============================================================================

#[test]
fn test_index_survives_reopen_on_disk() {
    init_logger();
    let dir = tempdir().unwrap();
    let disk_config = DiskManagerConfig {
        data_dir: dir.path().to_path_buf(),
        page_size: 64,
        fsync_enabled: false,
    };
    let config = IndexConfig::new(AttrType::Int32, true);

    {
        let disk = Arc::new(DiskManager::new(disk_config.clone()).unwrap());
        let buffer = BufferManager::new(BufferPoolConfig { num_frames: 4 }, disk).unwrap();
        let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();
        for k in (0..40).rev() {
            index.insert(&int(k), tid(k as u32)).unwrap();
        }
        for k in (0..40).filter(|k| k % 3 == 0) {
            index.remove(&int(k), &[tid(k as u32)]).unwrap();
        }
        index.close().unwrap();
        assert!(buffer.flush_all().is_ok());
    }

    let disk = Arc::new(DiskManager::new(disk_config).unwrap());
    let buffer = BufferManager::new(BufferPoolConfig { num_frames: 4 }, disk).unwrap();
    let mut index = SeqIndex::open(&buffer, INDEX_FILE, &config).unwrap();

    assert_sorted(&mut index);
    for k in 0..40 {
        let found = index.find(&int(k)).unwrap();
        if k % 3 == 0 {
            assert!(found.is_empty());
        } else {
            assert_eq!(found, vec![tid(k as u32)]);
        }
    }
}
