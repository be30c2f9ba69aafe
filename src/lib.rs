//! A virtualized binary Merkle tree that maps fixed-size keys to values without holding the whole
//! data set in memory.
//!
//! Nodes live in a pluggable [`storage::VirtualDataSource`] and are realized into memory only when
//! a lookup or a mutation touches them. Every node's hash is a pure function of its children, and
//! [`map::VirtualMap::copy`] freezes a version into a readable snapshot while a new mutable version
//! is built on top of the same data source.

pub mod codec;
pub mod hash;
pub mod map;
pub mod merkle;
pub mod storage;
pub mod utils;
pub mod word;

// RE-EXPORTS
// ================================================================================================

pub use codec::{Blob, ContractKey, FixedBytes, VirtualKey, VirtualValue};
pub use hash::{Digest, NULL_DIGEST};
pub use map::{CorruptIndexError, VirtualMap, VirtualMapError, empty_root_hash};
pub use merkle::{Path, PathError};
#[cfg(feature = "rocksdb")]
pub use storage::{RocksDbConfig, RocksDbDataSource};
pub use storage::{DataSourceUpdates, MemoryDataSource, StorageError, VirtualDataSource};
pub use word::Word256;

// TYPE ALIASES
// ================================================================================================

/// An alias for a key-value map.
///
/// Ordered maps keep commit batches and tree dumps deterministic.
pub type Map<K, V> = std::collections::BTreeMap<K, V>;

pub use std::collections::btree_map::Entry as MapEntry;

/// An alias for a simple set.
pub type Set<V> = std::collections::BTreeSet<V>;

// TESTS
// ================================================================================================

#[test]
#[should_panic]
#[allow(arithmetic_overflow)]
fn overflow_panics_for_test() {
    // path arithmetic relies on shift overflow being caught in tests.
    //
    // to enable overflow checks in release mode, ensure `RUSTFLAGS="-C overflow-checks"`
    let a = 1_u64;
    let b = 64;
    assert_ne!(a << b, 0);
}
