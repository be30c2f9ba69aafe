use std::sync::Arc;

use assert_matches::assert_matches;
use proptest::prelude::*;

use super::*;
use crate::{
    Word256,
    merkle::{MAX_DEPTH, leaf_hash},
    storage::{MemoryDataSource, StorageError},
};

type Source = Arc<MemoryDataSource<Word256, Word256>>;
type TestMap = VirtualMap<Word256, Word256, Source>;

fn key(n: u64) -> Word256 {
    Word256::from_u64(n)
}

fn value(n: u64) -> Word256 {
    Word256::from_u64(1_000_000 + n)
}

fn path(depth: u8, value: u64) -> Path {
    Path::new(depth, value).unwrap()
}

fn open() -> (Source, TestMap) {
    let source = Arc::new(MemoryDataSource::new());
    let map = VirtualMap::new(Arc::clone(&source)).unwrap();
    (source, map)
}

fn with_keys(keys: impl IntoIterator<Item = u64>) -> (Source, TestMap) {
    let (source, mut map) = open();
    for n in keys {
        assert_eq!(map.put(key(n), value(n)).unwrap(), None);
    }
    (source, map)
}

/// Root hash rebuilt from the layout alone: every slot is classified from the shape and every
/// leaf hashed from the value listed for it.
fn layout_hash(map: &TestMap) -> Digest {
    fn hash_slot(shape: &TreeShape, leaves: &Map<Path, Digest>, path: Path) -> Digest {
        match shape.classify(path) {
            SlotKind::Absent => NULL_DIGEST,
            SlotKind::Leaf => leaves[&path],
            SlotKind::Internal => internal_hash(
                hash_slot(shape, leaves, path.left_child().unwrap()),
                hash_slot(shape, leaves, path.right_child().unwrap()),
            ),
        }
    }

    let shape = TreeShape::new(map.first_leaf_path(), map.last_leaf_path()).unwrap();
    let leaves: Map<Path, Digest> = shape
        .leaf_paths()
        .zip(map.entries().unwrap())
        .map(|(path, (_, value))| (path, leaf_hash(&value)))
        .collect();
    hash_slot(&shape, &leaves, Path::ROOT)
}

// GROWTH
// ================================================================================================

#[test]
fn empty_map_has_the_empty_root_hash() {
    let (_, mut map) = open();
    assert!(map.is_empty());
    assert_eq!(map.hash().unwrap(), empty_root_hash());
    assert_eq!(map.get(&key(0)).unwrap(), None);
    assert_eq!(map.delete(&key(0)).unwrap(), None);
    assert!(!map.is_dirty());

    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), empty_root_hash());
    assert_eq!(map.to_text().unwrap(), "(empty)\n");
}

#[test]
fn five_keys_fill_the_tree_rank_by_rank() {
    let expected = [
        (path(1, 0), path(1, 0)),
        (path(1, 0), path(1, 1)),
        (path(1, 1), path(2, 1)),
        (path(2, 0), path(2, 3)),
        (path(2, 1), path(3, 1)),
    ];

    let (_, mut map) = open();
    let mut hashes = vec![map.hash().unwrap()];
    for (n, (first, last)) in expected.into_iter().enumerate() {
        map.put(key(n as u64), value(n as u64)).unwrap();
        assert_eq!(map.first_leaf_path(), Some(first), "first leaf after {} keys", n + 1);
        assert_eq!(map.last_leaf_path(), Some(last), "last leaf after {} keys", n + 1);

        let hash = map.hash().unwrap();
        assert!(!hashes.contains(&hash));
        hashes.push(hash);
    }

    let hash = map.hash().unwrap();
    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), hash);
    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), hash);
    assert_eq!(map.len(), 5);
}

#[test]
fn root_hash_commits_to_the_tree_layout() {
    let h = |n| leaf_hash(&value(n));

    let (_, mut map) = with_keys([0]);
    assert_eq!(map.hash().unwrap(), internal_hash(h(0), NULL_DIGEST));

    map.put(key(1), value(1)).unwrap();
    assert_eq!(map.hash().unwrap(), internal_hash(h(0), h(1)));

    // key 0 is pushed down to make room for key 2
    map.put(key(2), value(2)).unwrap();
    let expected = internal_hash(internal_hash(h(0), h(2)), h(1));
    assert_eq!(map.hash().unwrap(), expected);

    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), expected);
    let reopened = TestMap::new(Arc::clone(map.data_source())).unwrap();
    assert_eq!(reopened.hash().unwrap(), expected);
}

#[test]
fn put_replaces_values_in_place() {
    let (_, mut map) = with_keys(0..4);
    map.commit().unwrap();
    let shape = (map.first_leaf_path(), map.last_leaf_path());

    assert_eq!(map.put(key(2), value(20)).unwrap(), Some(value(2)));
    assert_eq!(map.put(key(2), value(21)).unwrap(), Some(value(20)));
    assert_eq!(map.get(&key(2)).unwrap(), Some(value(21)));
    assert_eq!((map.first_leaf_path(), map.last_leaf_path()), shape);
    assert_eq!(map.len(), 4);
}

#[test]
fn values_survive_commit_and_copy() {
    let (_, mut map) = with_keys(0..20);
    for n in 0..20 {
        assert_eq!(map.get(&key(n)).unwrap(), Some(value(n)));
    }

    map.commit().unwrap();
    for n in 0..20 {
        assert_eq!(map.get(&key(n)).unwrap(), Some(value(n)));
    }

    let next = map.copy().unwrap();
    for n in 0..20 {
        assert_eq!(next.get(&key(n)).unwrap(), Some(value(n)));
        assert!(next.contains_key(&key(n)).unwrap());
    }
    assert!(!next.contains_key(&key(20)).unwrap());
    assert_eq!(next.hash().unwrap(), map.hash().unwrap());
}

#[test]
fn hash_does_not_depend_on_commits_and_copies() {
    let (_, mut plain) = with_keys(0..40);

    let (_, mut versioned) = open();
    let mut snapshots = Vec::new();
    for n in 0..40 {
        versioned.put(key(n), value(n)).unwrap();
        match n % 7 {
            2 => versioned.commit().unwrap(),
            5 => {
                let next = versioned.copy().unwrap();
                snapshots.push(core::mem::replace(&mut versioned, next));
            },
            _ => {},
        }
    }
    assert_eq!(versioned.hash().unwrap(), plain.hash().unwrap());

    plain.commit().unwrap();
    versioned.commit().unwrap();
    assert_eq!(versioned.hash().unwrap(), plain.hash().unwrap());
}

// DELETION
// ================================================================================================

#[test]
fn deleting_the_last_key_restores_the_previous_hash() {
    for n in 1..=17 {
        let (_, mut map) = with_keys(0..n);
        let before = map.hash().unwrap();
        let shape = (map.first_leaf_path(), map.last_leaf_path());

        map.put(key(100), value(100)).unwrap();
        assert_eq!(map.delete(&key(100)).unwrap(), Some(value(100)));
        assert_eq!(map.hash().unwrap(), before, "uncommitted delete with {n} keys");
        assert_eq!((map.first_leaf_path(), map.last_leaf_path()), shape);

        map.put(key(100), value(100)).unwrap();
        map.commit().unwrap();
        assert_eq!(map.delete(&key(100)).unwrap(), Some(value(100)));
        map.commit().unwrap();
        assert_eq!(map.hash().unwrap(), before, "committed delete with {n} keys");
        assert_eq!(map.get(&key(100)).unwrap(), None);
    }
}

#[test]
fn deleting_a_middle_key_moves_the_last_leaf_into_its_slot() {
    // rank 2 holds keys 2, 1, 3 and rank 3 holds keys 0, 4
    let (_, mut map) = with_keys(0..5);
    map.commit().unwrap();

    assert_eq!(map.delete(&key(1)).unwrap(), Some(value(1)));
    assert_eq!(map.first_leaf_path(), Some(path(2, 0)));
    assert_eq!(map.last_leaf_path(), Some(path(2, 3)));
    let expected = vec![
        (key(0), value(0)),
        (key(2), value(2)),
        (key(4), value(4)),
        (key(3), value(3)),
    ];
    assert_eq!(map.entries().unwrap(), expected);

    // the same layout grown from scratch
    let (_, fresh) = with_keys([0, 4, 2, 3]);
    assert_eq!(map.hash().unwrap(), fresh.hash().unwrap());

    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), fresh.hash().unwrap());
    let reopened = TestMap::new(Arc::clone(map.data_source())).unwrap();
    assert_eq!(reopened.entries().unwrap(), expected);
}

#[test]
fn deleting_every_key_returns_to_the_empty_tree() {
    let (source, mut map) = with_keys(0..30);
    map.commit().unwrap();

    for n in (0..30).filter(|n| n % 3 == 0).chain((0..30).filter(|n| n % 3 != 0)) {
        assert_eq!(map.delete(&key(n)).unwrap(), Some(value(n)));
        assert_eq!(map.get(&key(n)).unwrap(), None);
        if n % 4 == 0 {
            map.commit().unwrap();
        }
    }
    assert!(map.is_empty());
    assert_eq!(map.hash().unwrap(), empty_root_hash());

    map.commit().unwrap();
    assert_eq!(map.hash().unwrap(), empty_root_hash());
    assert_eq!(source.leaf_count().unwrap(), 0);
    assert_eq!(source.record_count().unwrap(), 0);
    // only the root keeps a hash
    assert_eq!(source.hash_count().unwrap(), 1);
    assert_eq!(source.first_leaf_path().unwrap(), None);
}

#[test]
fn deleted_keys_can_be_inserted_again() {
    let (_, mut map) = with_keys(0..6);
    map.commit().unwrap();

    map.delete(&key(2)).unwrap();
    assert_eq!(map.put(key(2), value(22)).unwrap(), None);
    assert_eq!(map.get(&key(2)).unwrap(), Some(value(22)));
    map.commit().unwrap();

    let reopened = TestMap::new(Arc::clone(map.data_source())).unwrap();
    assert_eq!(reopened.get(&key(2)).unwrap(), Some(value(22)));
    assert_eq!(reopened.len(), 6);
    assert_eq!(reopened.hash().unwrap(), map.hash().unwrap());
}

// PERSISTENCE
// ================================================================================================

#[test]
fn reopening_reproduces_the_committed_tree() {
    let (source, mut map) = with_keys(0..25);
    for n in [3, 11, 24, 0] {
        map.delete(&key(n)).unwrap();
    }
    map.put(key(7), value(77)).unwrap();
    map.commit().unwrap();
    let hash = map.hash().unwrap();

    let mut reopened = TestMap::new(Arc::clone(&source)).unwrap();
    assert_eq!(reopened.len(), 21);
    assert_eq!(reopened.hash().unwrap(), hash);
    assert_eq!(reopened.entries().unwrap(), map.entries().unwrap());
    assert_eq!(reopened.get(&key(7)).unwrap(), Some(value(77)));

    // the reopened tree keeps growing where the old one stopped
    map.put(key(50), value(50)).unwrap();
    reopened.put(key(50), value(50)).unwrap();
    assert_eq!(reopened.hash().unwrap(), map.hash().unwrap());
}

#[test]
fn uncommitted_changes_stay_in_memory() {
    let (source, mut map) = with_keys(0..3);
    assert!(map.is_dirty());
    assert_eq!(source.leaf_count().unwrap(), 0);

    map.commit().unwrap();
    assert!(!map.is_dirty());
    assert_eq!(source.leaf_count().unwrap(), 3);
    assert_eq!(source.record_count().unwrap(), 3);
    // the root and the internal node at (1, 0)
    assert_eq!(source.hash_count().unwrap(), 2);
}

#[test]
fn inconsistent_leaf_paths_are_rejected() {
    let source: Source = Arc::new(MemoryDataSource::new());
    source.write_first_leaf_path(Some(path(1, 0))).unwrap();

    assert_matches!(
        TestMap::new(Arc::clone(&source)),
        Err(VirtualMapError::CorruptIndex(CorruptIndexError::InconsistentLeafPaths { .. }))
    );

    source.write_last_leaf_path(Some(path(3, 0))).unwrap();
    assert_matches!(
        TestMap::new(source),
        Err(VirtualMapError::CorruptIndex(CorruptIndexError::InconsistentLeafPaths { .. }))
    );
}

#[test]
fn missing_records_are_reported() {
    let (source, mut map) = with_keys(0..3);
    map.commit().unwrap();
    // key 1 sits at the first leaf path, which the next insertion pushes down
    source.delete_record(path(1, 1)).unwrap();

    let mut reopened = TestMap::new(Arc::clone(&source)).unwrap();
    assert_matches!(
        reopened.put(key(3), value(3)),
        Err(VirtualMapError::CorruptIndex(CorruptIndexError::MissingRecord(p))) if p == path(1, 1)
    );
}

#[test]
fn storage_errors_are_propagated() {
    let (source, mut map) = with_keys(0..3);
    map.commit().unwrap();
    source.close().unwrap();

    assert_matches!(map.get(&key(1)), Err(VirtualMapError::Storage(StorageError::Closed)));
    assert_matches!(map.put(key(9), value(9)), Err(VirtualMapError::Storage(StorageError::Closed)));
}

// SNAPSHOTS
// ================================================================================================

#[test]
fn snapshots_keep_their_state() {
    let (_, mut snapshot) = with_keys(0..10);
    let mut next = snapshot.copy().unwrap();
    let hash = snapshot.hash().unwrap();
    assert!(snapshot.is_immutable());
    assert!(!next.is_immutable());

    next.put(key(0), value(100)).unwrap();
    next.delete(&key(1)).unwrap();
    next.put(key(10), value(10)).unwrap();
    next.commit().unwrap();

    assert_eq!(snapshot.get(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(snapshot.get(&key(1)).unwrap(), Some(value(1)));
    assert_eq!(snapshot.get(&key(10)).unwrap(), None);
    // moved but unchanged keys read the same
    for n in 2..10 {
        assert_eq!(snapshot.get(&key(n)).unwrap(), Some(value(n)));
    }
    assert_eq!(snapshot.hash().unwrap(), hash);
    assert_eq!(snapshot.len(), 10);

    assert_eq!(next.get(&key(0)).unwrap(), Some(value(100)));
    assert_eq!(next.get(&key(1)).unwrap(), None);
    assert_eq!(next.get(&key(10)).unwrap(), Some(value(10)));
    assert_ne!(next.hash().unwrap(), hash);
}

#[test]
fn snapshots_can_be_traversed_until_a_newer_version_commits() {
    let (_, mut snapshot) = with_keys(0..4);
    let mut next = snapshot.copy().unwrap();
    assert_eq!(snapshot.entries().unwrap().len(), 4);

    next.put(key(2), value(22)).unwrap();
    assert_eq!(snapshot.entries().unwrap().len(), 4);

    next.commit().unwrap();
    assert_matches!(snapshot.entries(), Err(VirtualMapError::SnapshotDiverged));
    assert_matches!(snapshot.to_text(), Err(VirtualMapError::SnapshotDiverged));
    assert_eq!(next.entries().unwrap().len(), 4);
}

#[test]
fn every_live_snapshot_keeps_its_own_state() {
    let (_, mut v1) = with_keys(0..5);
    let mut v2 = v1.copy().unwrap();
    v2.put(key(0), value(10)).unwrap();
    v2.delete(&key(4)).unwrap();

    let mut v3 = v2.copy().unwrap();
    v3.put(key(0), value(20)).unwrap();
    v3.put(key(4), value(40)).unwrap();
    v3.commit().unwrap();

    assert_eq!(v1.get(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(v2.get(&key(0)).unwrap(), Some(value(10)));
    assert_eq!(v3.get(&key(0)).unwrap(), Some(value(20)));

    assert_eq!(v1.get(&key(4)).unwrap(), Some(value(4)));
    assert_eq!(v2.get(&key(4)).unwrap(), None);
    assert_eq!(v3.get(&key(4)).unwrap(), Some(value(40)));

    // a released snapshot is no longer kept up to date
    drop(v2);
    v3.put(key(0), value(30)).unwrap();
    v3.commit().unwrap();
    assert_eq!(v1.get(&key(0)).unwrap(), Some(value(0)));
    assert_eq!(v3.get(&key(0)).unwrap(), Some(value(30)));
}

#[test]
fn snapshots_are_readable_from_other_threads() {
    let (_, mut snapshot) = with_keys(0..50);
    let mut next = snapshot.copy().unwrap();
    let snapshot = Arc::new(snapshot);

    let reader = {
        let snapshot = Arc::clone(&snapshot);
        std::thread::spawn(move || {
            for _ in 0..20 {
                for n in 0..50 {
                    assert_eq!(snapshot.get(&key(n)).unwrap(), Some(value(n)));
                }
            }
        })
    };
    for n in 0..50 {
        next.put(key(n), value(n + 500)).unwrap();
        if n % 10 == 9 {
            next.commit().unwrap();
        }
    }
    reader.join().unwrap();
}

#[test]
#[should_panic(expected = "immutable")]
fn snapshots_reject_mutation() {
    let (_, mut snapshot) = with_keys(0..2);
    let _next = snapshot.copy().unwrap();
    let _ = snapshot.put(key(5), value(5));
}

#[test]
#[should_panic(expected = "immutable")]
fn snapshots_cannot_be_copied_again() {
    let (_, mut snapshot) = with_keys(0..2);
    let _next = snapshot.copy().unwrap();
    let _ = snapshot.copy();
}

#[test]
fn release_closes_the_data_source_with_the_last_version() {
    let (source, mut snapshot) = with_keys(0..3);
    let next = snapshot.copy().unwrap();

    snapshot.release().unwrap();
    assert!(!source.is_closed());
    assert_eq!(next.get(&key(1)).unwrap(), Some(value(1)));

    next.release().unwrap();
    assert!(source.is_closed());
}

// DEBUG OUTPUT
// ================================================================================================

#[test]
fn to_text_renders_one_rank_per_line() {
    let (_, mut map) = with_keys(0..3);
    let text = map.to_text().unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "0: I*");
    assert!(lines[1].starts_with("1: I* L*("));
    assert_eq!(lines[2].matches("L*").count(), 2);

    map.commit().unwrap();
    let text = map.to_text().unwrap();
    assert!(!text.contains('*'));
    assert_eq!(text.matches('L').count(), 3);
    assert!(text.contains(&format!("{:?}", key(1))));
}

#[test]
fn to_text_renders_ghost_leaves_of_a_committed_tree() {
    let (_, mut map) = with_keys(0..5);
    map.commit().unwrap();

    let [k0, k1, k2, k3, k4] = [0, 1, 2, 3, 4].map(|n| format!("{:?}", key(n)));
    let expected = format!("0: I\n1: I I\n2: I L({k2}) L({k1}) L({k3})\n3: L({k0}) L({k4})\n");
    assert_eq!(map.to_text().unwrap(), expected);

    let (_, empty) = open();
    assert_eq!(empty.to_text().unwrap(), "(empty)\n");
}

// HASHING
// ================================================================================================

#[test]
fn parallel_and_serial_hashing_agree() {
    let (source, mut map) = with_keys(0..1500);
    map.commit().unwrap();

    for n in (0..1500).step_by(7) {
        assert_eq!(map.delete(&key(n)).unwrap(), Some(value(n)));
    }
    for n in (0..1500).step_by(5) {
        map.put(key(n), value(n + 1)).unwrap();
    }
    for n in 1500..1700 {
        map.put(key(n), value(n)).unwrap();
    }

    let serial = map.compute_hash(Path::ROOT, &mut Map::new(), 0).unwrap();
    let split = map.compute_hash(Path::ROOT, &mut Map::new(), 8).unwrap();
    let whole = map.compute_hash(Path::ROOT, &mut Map::new(), MAX_DEPTH).unwrap();
    assert_eq!(serial, split);
    assert_eq!(serial, whole);
    assert_eq!(serial, map.hash().unwrap());
    assert_eq!(serial, layout_hash(&map));

    assert_eq!(map.hash_mut().unwrap(), serial);
    map.commit().unwrap();
    let reopened = TestMap::new(source).unwrap();
    assert_eq!(reopened.hash().unwrap(), serial);
}

#[test]
fn hash_mut_caches_recomputed_hashes() {
    let (_, mut map) = with_keys(0..20);
    let cached = |map: &TestMap| {
        map.nodes.values().filter_map(Node::as_internal).all(|node| node.hash().is_some())
    };
    assert!(!cached(&map));

    let hash = map.hash_mut().unwrap();
    assert!(cached(&map));
    assert_eq!(map.hash().unwrap(), hash);
    assert!(map.is_dirty());

    map.put(key(3), value(30)).unwrap();
    assert!(!cached(&map));
    assert_ne!(map.hash_mut().unwrap(), hash);
    assert!(cached(&map));
    assert_eq!(map.hash().unwrap(), layout_hash(&map));

    map.delete(&key(3)).unwrap();
    assert_eq!(map.hash_mut().unwrap(), layout_hash(&map));
}

// RANDOMIZED
// ================================================================================================

#[derive(Debug, Clone)]
enum Op {
    Put(u64, u64),
    Delete(u64),
    Commit,
    Copy,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0u64..24, any::<u64>()).prop_map(|(k, v)| Op::Put(k, v)),
        3 => (0u64..24).prop_map(Op::Delete),
        1 => Just(Op::Commit),
        1 => Just(Op::Copy),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn behaves_like_an_ordered_map(ops in prop::collection::vec(op(), 1..120)) {
        let (source, mut map) = open();
        let mut model = Map::new();
        let mut snapshot: Option<(TestMap, Map<u64, u64>, Digest)> = None;

        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let old = map.put(key(k), Word256::from_u64(v)).unwrap();
                    prop_assert_eq!(old, model.insert(k, v).map(Word256::from_u64));
                },
                Op::Delete(k) => {
                    let old = map.delete(&key(k)).unwrap();
                    prop_assert_eq!(old, model.remove(&k).map(Word256::from_u64));
                },
                Op::Commit => {
                    map.commit().unwrap();
                    let reopened = TestMap::new(Arc::clone(&source)).unwrap();
                    prop_assert_eq!(reopened.hash().unwrap(), map.hash().unwrap());
                    prop_assert_eq!(reopened.entries().unwrap().len() as u64, map.len());
                },
                Op::Copy => {
                    let next = map.copy().unwrap();
                    let frozen = core::mem::replace(&mut map, next);
                    let hash = frozen.hash().unwrap();
                    snapshot = Some((frozen, model.clone(), hash));
                },
            }
            prop_assert_eq!(map.len(), model.len() as u64);
            prop_assert_eq!(map.hash().unwrap(), layout_hash(&map));
        }

        for k in 0..24 {
            let expected = model.get(&k).copied().map(Word256::from_u64);
            prop_assert_eq!(map.get(&key(k)).unwrap(), expected);
        }
        let mut entries: Vec<(u64, u64)> = map
            .entries()
            .unwrap()
            .into_iter()
            .map(|(k, v)| (k.to_u64().unwrap(), v.to_u64().unwrap()))
            .collect();
        entries.sort();
        prop_assert_eq!(entries, model.into_iter().collect::<Vec<_>>());

        // a fresh map over the committed state agrees with the writer
        map.commit().unwrap();
        let reopened = TestMap::new(Arc::clone(&source)).unwrap();
        prop_assert_eq!(reopened.hash().unwrap(), map.hash().unwrap());
        prop_assert_eq!(reopened.hash().unwrap(), layout_hash(&reopened));
        // one stored hash per internal node, and the root of an empty tree
        let internal_nodes = map.len().saturating_sub(1).max(1);
        prop_assert_eq!(source.hash_count().unwrap() as u64, internal_nodes);

        if let Some((frozen, frozen_model, hash)) = snapshot {
            prop_assert_eq!(frozen.hash().unwrap(), hash);
            prop_assert_eq!(frozen.len(), frozen_model.len() as u64);
            for k in 0..24 {
                prop_assert_eq!(
                    frozen.get(&key(k)).unwrap(),
                    frozen_model.get(&k).copied().map(Word256::from_u64)
                );
            }
        }
    }
}
