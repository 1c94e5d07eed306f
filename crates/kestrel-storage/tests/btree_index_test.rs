//! End-to-end tests for the B+ tree index: bulk build, insertion with
//! splits, range scans, error taxonomy, reopen, and pin discipline.

use kestrel_common::{AttrType, KestrelError, RecordId, ScanOp, StorageConfig};
use kestrel_storage::{BTreeIndex, Pager, RecordFile, LEAF_CAPACITY};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// Byte offset of the key inside test records.
const ATTR_OFFSET: usize = 8;

fn create_test_pager(frames: usize) -> (Arc<Pager>, TempDir) {
    let dir = tempdir().unwrap();
    let pager = Pager::new(StorageConfig {
        data_dir: dir.path().to_path_buf(),
        buffer_pool_frames: frames,
        fsync_enabled: false,
    })
    .unwrap();
    (Arc::new(pager), dir)
}

/// A 16-byte record with the key at ATTR_OFFSET.
fn make_record(key: i32) -> Vec<u8> {
    let mut record = vec![0u8; 16];
    record[ATTR_OFFSET..ATTR_OFFSET + 4].copy_from_slice(&key.to_le_bytes());
    record
}

/// Creates a relation file holding one record per key, in the given order.
/// Returns each key with the record id it was stored under.
fn build_relation(pager: &Arc<Pager>, name: &str, keys: &[i32]) -> Vec<(i32, RecordId)> {
    let relation = RecordFile::create(Arc::clone(pager), name).unwrap();
    let mut stored = Vec::with_capacity(keys.len());
    for &key in keys {
        let rid = relation.insert_record(&make_record(key)).unwrap();
        stored.push((key, rid));
    }
    relation.flush().unwrap();
    stored
}

/// Opens (and on first use builds) the index for a relation.
fn open_index(pager: &Arc<Pager>, relation: &str) -> BTreeIndex {
    BTreeIndex::open(Arc::clone(pager), relation, ATTR_OFFSET, AttrType::Int).unwrap()
}

/// Drains an already-started scan.
fn collect_scan(index: &mut BTreeIndex) -> Vec<RecordId> {
    let mut rids = Vec::new();
    loop {
        match index.scan_next() {
            Ok(rid) => rids.push(rid),
            Err(KestrelError::IndexScanCompleted) => break,
            Err(e) => panic!("scan failed: {e}"),
        }
    }
    rids
}

/// The record ids for keys within [low, high], in ascending key order.
fn expected_rids(stored: &[(i32, RecordId)], low: i32, high: i32) -> Vec<RecordId> {
    let mut in_range: Vec<_> = stored
        .iter()
        .filter(|(key, _)| *key >= low && *key <= high)
        .cloned()
        .collect();
    in_range.sort_by_key(|(key, _)| *key);
    in_range.into_iter().map(|(_, rid)| rid).collect()
}

#[test]
fn test_bulk_build_and_inclusive_range_scan() {
    let (pager, _dir) = create_test_pager(64);
    let stored = build_relation(&pager, "emps", &[5, 3, 8, 1, 4, 7, 9, 2, 6]);

    let mut index = open_index(&pager, "emps");
    assert_eq!(index.index_name(), "emps.8");

    index.start_scan(2, ScanOp::Gte, 7, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    assert_eq!(rids, expected_rids(&stored, 2, 7));
    assert_eq!(rids.len(), 6);

    index.end_scan().unwrap();
    assert_eq!(pager.pinned_count(index.file()), 0);
}

#[test]
fn test_strict_bounds_exclude_endpoints() {
    let (pager, _dir) = create_test_pager(64);
    let stored = build_relation(&pager, "emps", &[10, 20, 30, 40, 50]);

    let mut index = open_index(&pager, "emps");

    index.start_scan(0, ScanOp::Gt, 100, ScanOp::Lt).unwrap();
    assert_eq!(collect_scan(&mut index), expected_rids(&stored, 10, 50));
    index.end_scan().unwrap();

    index.start_scan(10, ScanOp::Gt, 50, ScanOp::Lt).unwrap();
    assert_eq!(collect_scan(&mut index), expected_rids(&stored, 20, 40));
    index.end_scan().unwrap();
}

#[test]
fn test_point_scan_on_duplicate_keys() {
    let (pager, _dir) = create_test_pager(64);
    let stored = build_relation(&pager, "emps", &[1, 7, 7, 7, 9]);

    let mut index = open_index(&pager, "emps");

    index.start_scan(7, ScanOp::Gte, 7, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    assert_eq!(rids.len(), 3);
    for rid in &rids {
        assert!(stored.iter().any(|(key, r)| *key == 7 && r == rid));
    }
    index.end_scan().unwrap();

    // Any strict operator empties a point range.
    assert!(matches!(
        index.start_scan(7, ScanOp::Gt, 7, ScanOp::Lte),
        Err(KestrelError::NoSuchKey)
    ));
    assert_eq!(pager.pinned_count(index.file()), 0);
}

#[test]
fn test_bad_range_rejected() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 2, 3]);
    let mut index = open_index(&pager, "emps");

    assert!(matches!(
        index.start_scan(50, ScanOp::Gt, 10, ScanOp::Lt),
        Err(KestrelError::BadRange { low: 50, high: 10 })
    ));
}

#[test]
fn test_bad_operators_rejected() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 2, 3]);
    let mut index = open_index(&pager, "emps");

    assert!(matches!(
        index.start_scan(5, ScanOp::Lt, 10, ScanOp::Gte),
        Err(KestrelError::BadOperator)
    ));
    assert!(matches!(
        index.start_scan(5, ScanOp::Gte, 10, ScanOp::Gt),
        Err(KestrelError::BadOperator)
    ));
    // Operators are validated before the range.
    assert!(matches!(
        index.start_scan(50, ScanOp::Lt, 10, ScanOp::Gte),
        Err(KestrelError::BadOperator)
    ));
}

#[test]
fn test_empty_tree_scan_finds_nothing() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    assert!(matches!(
        index.start_scan(0, ScanOp::Gte, 0, ScanOp::Lte),
        Err(KestrelError::NoSuchKey)
    ));
    assert_eq!(pager.pinned_count(index.file()), 0);
}

#[test]
fn test_scan_calls_without_start() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1]);
    let mut index = open_index(&pager, "emps");

    assert!(matches!(
        index.scan_next(),
        Err(KestrelError::ScanNotInitialized)
    ));
    assert!(matches!(
        index.end_scan(),
        Err(KestrelError::ScanNotInitialized)
    ));
}

#[test]
fn test_exhausted_scan_completes_then_ends_cleanly() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 2, 3]);
    let mut index = open_index(&pager, "emps");

    // The upper bound lies past every key, so the scan runs off the last
    // leaf and completes rather than failing NoSuchKey.
    index.start_scan(2, ScanOp::Gte, 100, ScanOp::Lte).unwrap();
    assert_eq!(collect_scan(&mut index).len(), 2);
    assert!(matches!(
        index.scan_next(),
        Err(KestrelError::IndexScanCompleted)
    ));

    index.end_scan().unwrap();
    assert_eq!(pager.pinned_count(index.file()), 0);
    assert!(matches!(
        index.end_scan(),
        Err(KestrelError::ScanNotInitialized)
    ));
}

#[test]
fn test_first_insert_lands_in_initial_leaf() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    let root_before = index.root_page_no();
    assert!(index.is_root_leaf());

    index.insert_entry(42, RecordId::new(99, 0)).unwrap();

    assert_eq!(index.root_page_no(), root_before);
    assert!(index.is_root_leaf());
    assert_eq!(index.height().unwrap(), 1);

    index.start_scan(42, ScanOp::Gte, 42, ScanOp::Lte).unwrap();
    assert_eq!(collect_scan(&mut index), vec![RecordId::new(99, 0)]);
    index.end_scan().unwrap();
}

#[test]
fn test_leaf_split_promotes_root_and_keeps_order() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    // One more than a leaf holds forces exactly one split.
    let count = LEAF_CAPACITY as i32 + 1;
    let mut keys: Vec<i32> = (0..count).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &key in &keys {
        index.insert_entry(key, RecordId::new(key as u32 + 1, 0)).unwrap();
        assert_eq!(pager.pinned_count(index.file()), 0);
    }

    assert!(!index.is_root_leaf());
    assert_eq!(index.height().unwrap(), 2);

    index.start_scan(0, ScanOp::Gte, count - 1, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    assert_eq!(rids.len(), count as usize);
    // Ascending key order means ascending synthetic page numbers.
    let pages: Vec<u32> = rids.iter().map(|rid| rid.page_no).collect();
    let expected: Vec<u32> = (1..=count as u32).collect();
    assert_eq!(pages, expected);
}

#[test]
fn test_permutation_insert_scan_law() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    let n = 1000;
    let mut keys: Vec<i32> = (0..n).collect();
    keys.shuffle(&mut rand::thread_rng());
    for &key in &keys {
        index.insert_entry(key, RecordId::new(key as u32 + 1, 7)).unwrap();
    }

    index.start_scan(0, ScanOp::Gte, n - 1, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    assert_eq!(rids.len(), n as usize);
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
        assert_eq!(rid.slot, 7);
    }
}

#[test]
fn test_range_scan_spans_leaf_boundary() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    for key in 0..(LEAF_CAPACITY as i32 * 3) {
        index.insert_entry(key, RecordId::new(key as u32 + 1, 0)).unwrap();
    }

    // A window straddling the first split point crosses leaves mid-scan.
    let low = LEAF_CAPACITY as i32 / 2 - 10;
    let high = LEAF_CAPACITY as i32 / 2 + 10;
    index.start_scan(low, ScanOp::Gte, high, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    assert_eq!(rids.len(), (high - low + 1) as usize);
    assert_eq!(rids[0].page_no, low as u32 + 1);
    assert_eq!(rids.last().unwrap().page_no, high as u32 + 1);
}

#[test]
fn test_restarting_scan_ends_previous_one() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 2, 3, 4, 5]);
    let mut index = open_index(&pager, "emps");

    index.start_scan(1, ScanOp::Gte, 5, ScanOp::Lte).unwrap();
    index.scan_next().unwrap();

    // Starting again releases the first scan's pin and repositions.
    index.start_scan(3, ScanOp::Gte, 5, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    assert_eq!(rids.len(), 3);
    index.end_scan().unwrap();
    assert_eq!(pager.pinned_count(index.file()), 0);
}

#[test]
fn test_reopen_yields_identical_scans() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        buffer_pool_frames: 64,
        fsync_enabled: false,
    };
    let keys: Vec<i32> = (0..500).rev().collect();

    let first_scan;
    {
        let pager = Arc::new(Pager::new(config.clone()).unwrap());
        let stored = build_relation(&pager, "emps", &keys);
        let mut index = open_index(&pager, "emps");
        index.start_scan(0, ScanOp::Gte, 499, ScanOp::Lte).unwrap();
        first_scan = collect_scan(&mut index);
        assert_eq!(first_scan, expected_rids(&stored, 0, 499));
        index.end_scan().unwrap();
        index.close().unwrap();
    }

    let pager = Arc::new(Pager::new(config).unwrap());
    let mut index = open_index(&pager, "emps");
    index.start_scan(0, ScanOp::Gte, 499, ScanOp::Lte).unwrap();
    assert_eq!(collect_scan(&mut index), first_scan);
    index.end_scan().unwrap();
}

#[test]
fn test_insert_after_reopen_extends_tree() {
    let dir = tempdir().unwrap();
    let config = StorageConfig {
        data_dir: dir.path().to_path_buf(),
        buffer_pool_frames: 64,
        fsync_enabled: false,
    };

    {
        let pager = Arc::new(Pager::new(config.clone()).unwrap());
        build_relation(&pager, "emps", &[100]);
        let index = open_index(&pager, "emps");
        assert!(index.is_root_leaf());
        index.close().unwrap();
    }

    // Reopened while still a single leaf; growing past one leaf must still
    // promote the root correctly.
    let pager = Arc::new(Pager::new(config).unwrap());
    let mut index = open_index(&pager, "emps");
    assert!(index.is_root_leaf());

    for key in 0..(LEAF_CAPACITY as i32 + 50) {
        index.insert_entry(key * 2, RecordId::new(key as u32 + 1000, 0)).unwrap();
    }
    assert!(!index.is_root_leaf());
    assert_eq!(index.height().unwrap(), 2);

    index.start_scan(0, ScanOp::Gte, i32::MAX, ScanOp::Lt).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();
    assert_eq!(rids.len(), LEAF_CAPACITY + 50 + 1);
}

#[test]
fn test_mismatched_metadata_rejected() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 2, 3]);

    let index = open_index(&pager, "emps");
    index.close().unwrap();

    // Same file name, different attribute type in the constructor.
    let result = BTreeIndex::open(Arc::clone(&pager), "emps", ATTR_OFFSET, AttrType::Double);
    assert!(matches!(result, Err(KestrelError::BadIndexInfo { .. })));
}

#[test]
fn test_missing_relation_fails_build() {
    let (pager, _dir) = create_test_pager(64);
    let result = BTreeIndex::open(Arc::clone(&pager), "absent", ATTR_OFFSET, AttrType::Int);
    assert!(matches!(result, Err(KestrelError::FileNotFound { .. })));
}

#[test]
fn test_ascending_volume_reaches_height_three() {
    let (pager, _dir) = create_test_pager(256);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    // Enough ascending keys to split the root internal node: rightmost
    // leaf splits add a child each, overflowing the first internal root.
    let n: i32 = 88_000;
    for key in 0..n {
        index.insert_entry(key, RecordId::new(key as u32 + 1, 0)).unwrap();
    }

    assert_eq!(index.height().unwrap(), 3);
    assert_eq!(pager.pinned_count(index.file()), 0);

    index.start_scan(0, ScanOp::Gte, n - 1, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    assert_eq!(rids.len(), n as usize);
    for (i, rid) in rids.iter().enumerate() {
        assert_eq!(rid.page_no, i as u32 + 1);
    }
}

#[test]
fn test_descending_volume_scans_ascending() {
    let (pager, _dir) = create_test_pager(128);
    build_relation(&pager, "emps", &[]);
    let mut index = open_index(&pager, "emps");

    let n: i32 = 2000;
    for key in (0..n).rev() {
        index.insert_entry(key, RecordId::new(key as u32 + 1, 0)).unwrap();
    }

    index.start_scan(0, ScanOp::Gte, n - 1, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();

    let pages: Vec<u32> = rids.iter().map(|rid| rid.page_no).collect();
    let expected: Vec<u32> = (1..=n as u32).collect();
    assert_eq!(pages, expected);
}

#[test]
fn test_negative_keys() {
    let (pager, _dir) = create_test_pager(64);
    let stored = build_relation(&pager, "emps", &[-5, -1, 0, 3, -9]);
    let mut index = open_index(&pager, "emps");

    index.start_scan(-6, ScanOp::Gte, 0, ScanOp::Lte).unwrap();
    let rids = collect_scan(&mut index);
    index.end_scan().unwrap();
    assert_eq!(rids, expected_rids(&stored, -6, 0));
    assert_eq!(rids.len(), 3);
}

#[test]
fn test_scan_sees_prior_inserts() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[1, 3]);
    let mut index = open_index(&pager, "emps");

    index.insert_entry(2, RecordId::new(77, 0)).unwrap();

    index.start_scan(2, ScanOp::Gte, 2, ScanOp::Lte).unwrap();
    assert_eq!(collect_scan(&mut index), vec![RecordId::new(77, 0)]);
    index.end_scan().unwrap();
}

#[test]
fn test_no_pins_held_between_operations() {
    let (pager, _dir) = create_test_pager(64);
    build_relation(&pager, "emps", &[7, 5, 3]);
    let mut index = open_index(&pager, "emps");
    assert_eq!(pager.pinned_count(index.file()), 0);

    index.insert_entry(4, RecordId::new(50, 0)).unwrap();
    assert_eq!(pager.pinned_count(index.file()), 0);

    index.start_scan(3, ScanOp::Gte, 7, ScanOp::Lte).unwrap();
    assert_eq!(pager.pinned_count(index.file()), 1); // the scan's leaf

    index.end_scan().unwrap();
    assert_eq!(pager.pinned_count(index.file()), 0);

    assert!(matches!(
        index.start_scan(100, ScanOp::Gte, 200, ScanOp::Lte),
        Err(KestrelError::NoSuchKey)
    ));
    assert_eq!(pager.pinned_count(index.file()), 0);
}
