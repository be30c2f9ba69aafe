//! Scenarios shared by the integration tests of every data source.

#![allow(dead_code)]

use virtual_merkle::{
    Blob, ContractKey, MemoryDataSource, VirtualDataSource, VirtualMap, Word256, empty_root_hash,
};

pub type StorageMap<S> = VirtualMap<ContractKey, Blob, S>;

pub fn slot(contract_id: u64, n: u64) -> ContractKey {
    ContractKey::new(contract_id, Word256::from_u64(n))
}

pub fn blob(n: u64) -> Blob {
    Blob::new(format!("value-{n}").into_bytes())
}

/// Builds the same map over `source` and over a fresh in-memory data source, interleaving
/// commits, and checks that both agree on every value and on the root hash.
pub fn matches_memory_source<S: VirtualDataSource<ContractKey, Blob>>(source: S) {
    let mut map = StorageMap::new(source).unwrap();
    let mut reference = StorageMap::new(MemoryDataSource::new()).unwrap();

    for contract in 0..3 {
        for n in 0..40 {
            map.put(slot(contract, n), blob(n)).unwrap();
            reference.put(slot(contract, n), blob(n)).unwrap();
        }
        map.commit().unwrap();
    }
    for n in (0..40).step_by(3) {
        map.delete(&slot(1, n)).unwrap();
        reference.delete(&slot(1, n)).unwrap();
    }
    map.put(slot(2, 7), blob(700)).unwrap();
    reference.put(slot(2, 7), blob(700)).unwrap();
    map.commit().unwrap();

    assert_eq!(map.len(), reference.len());
    assert_eq!(map.hash().unwrap(), reference.hash().unwrap());
    assert_eq!(map.entries().unwrap(), reference.entries().unwrap());
    assert_eq!(map.get(&slot(1, 3)).unwrap(), None);
    assert_eq!(map.get(&slot(1, 4)).unwrap(), Some(blob(4)));
    assert_eq!(map.get(&slot(2, 7)).unwrap(), Some(blob(700)));
    map.release().unwrap();
}

/// A snapshot keeps answering with its own state while the next version commits over it.
pub fn snapshot_isolation<S: VirtualDataSource<ContractKey, Blob>>(source: S) {
    let mut snapshot = StorageMap::new(source).unwrap();
    for n in 0..16 {
        snapshot.put(slot(0, n), blob(n)).unwrap();
    }
    let mut next = snapshot.copy().unwrap();
    let hash = snapshot.hash().unwrap();

    for n in 0..8 {
        next.delete(&slot(0, n)).unwrap();
    }
    for n in 8..16 {
        next.put(slot(0, n), Blob::default()).unwrap();
    }
    next.put(slot(9, 9), blob(99)).unwrap();
    next.commit().unwrap();

    for n in 0..16 {
        assert_eq!(snapshot.get(&slot(0, n)).unwrap(), Some(blob(n)));
    }
    assert_eq!(snapshot.get(&slot(9, 9)).unwrap(), None);
    assert_eq!(snapshot.hash().unwrap(), hash);

    assert_eq!(next.len(), 9);
    assert_eq!(next.get(&slot(0, 3)).unwrap(), None);
    assert_eq!(next.get(&slot(0, 12)).unwrap(), Some(Blob::default()));

    snapshot.release().unwrap();
    next.release().unwrap();
}

/// Deleting every key leaves the same root hash as a map which never held any.
pub fn delete_everything<S: VirtualDataSource<ContractKey, Blob>>(source: S) {
    let mut map = StorageMap::new(source).unwrap();
    for n in 0..50 {
        map.put(slot(n % 4, n), blob(n)).unwrap();
    }
    map.commit().unwrap();

    for n in (0..50).rev() {
        assert_eq!(map.delete(&slot(n % 4, n)).unwrap(), Some(blob(n)));
    }
    map.commit().unwrap();

    assert!(map.is_empty());
    assert_eq!(map.first_leaf_path(), None);
    assert_eq!(map.hash().unwrap(), empty_root_hash());
    assert!(map.entries().unwrap().is_empty());
    map.release().unwrap();
}
