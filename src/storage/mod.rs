//! The persistence boundary of a [`crate::VirtualMap`].

use core::{fmt, ops::Deref};

use crate::{
    codec::{VirtualKey, VirtualValue},
    hash::Digest,
    merkle::Path,
};

mod error;
pub use error::StorageError;

#[cfg(feature = "rocksdb")]
mod rocksdb;
#[cfg(feature = "rocksdb")]
pub use rocksdb::{RocksDbConfig, RocksDbDataSource};

mod memory;
pub use memory::MemoryDataSource;

mod updates;
pub use updates::{DataSourceUpdateParts, DataSourceUpdates, LeafUpdate};


/// Storage backend of a virtual Merkle tree.
///
/// A data source keeps three kinds of records:
/// - the hash of every internal node, by path;
/// - a record for every leaf, by path: the key stored there and the leaf hash;
/// - an index from every key to its current path and value.
///
/// It also keeps the first and last leaf paths so the shape of the tree survives restarts.
///
/// Backends must return just-saved data from a subsequent load and `None` after a delete. After
/// [`VirtualDataSource::close`] every other method fails with [`StorageError::Closed`].
///
/// All methods are expected to handle potential storage errors by returning a
/// `Result<_, StorageError>`.
pub trait VirtualDataSource<K: VirtualKey, V: VirtualValue>:
    'static + fmt::Debug + Send + Sync
{
    // INTERNAL NODES
    // --------------------------------------------------------------------------------------------

    /// Retrieves the hash of the internal node at `path`, or `None` if no hash is stored there.
    fn load_hash(&self, path: Path) -> Result<Option<Digest>, StorageError>;

    /// Stores the hash of the internal node at `path`, replacing any previous one.
    fn save_hash(&self, path: Path, hash: Digest) -> Result<(), StorageError>;

    /// Removes the hash of the internal node at `path`. Removing a missing hash is not an error.
    fn delete_hash(&self, path: Path) -> Result<(), StorageError>;

    // LEAF RECORDS
    // --------------------------------------------------------------------------------------------

    /// Retrieves the key and hash of the leaf stored at `path`.
    fn load_record(&self, path: Path) -> Result<Option<(K, Digest)>, StorageError>;

    /// Stores the key and hash of the leaf at `path`, replacing any previous record.
    fn save_record(&self, path: Path, key: &K, hash: Digest) -> Result<(), StorageError>;

    /// Removes the leaf record at `path`. Removing a missing record is not an error.
    fn delete_record(&self, path: Path) -> Result<(), StorageError>;

    // KEY INDEX
    // --------------------------------------------------------------------------------------------

    /// Retrieves the value stored for `key`.
    fn load_value_by_key(&self, key: &K) -> Result<Option<V>, StorageError>;

    /// Retrieves the path of the leaf holding `key`.
    fn load_path_by_key(&self, key: &K) -> Result<Option<Path>, StorageError>;

    /// Stores `key` with its path and value, replacing any previous entry for `key`.
    fn save_leaf(&self, key: &K, path: Path, value: &V) -> Result<(), StorageError>;

    /// Removes `key` from the index, and removes the record at `path` if that record still
    /// belongs to `key`.
    fn delete_leaf(&self, key: &K, path: Path) -> Result<(), StorageError>;

    /// Re-keys `key` from `old` to `new`.
    ///
    /// The index entry of `key` is pointed at `new`. The record at `old` is moved to `new` only if
    /// it still belongs to `key`, so a batch of moves may chain or swap paths in any order.
    fn update_path(&self, key: &K, old: Path, new: Path) -> Result<(), StorageError>;

    // TREE SHAPE
    // --------------------------------------------------------------------------------------------

    /// Retrieves the persisted path of the first leaf.
    fn first_leaf_path(&self) -> Result<Option<Path>, StorageError>;

    /// Persists the path of the first leaf; `None` marks an empty tree.
    fn write_first_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError>;

    /// Retrieves the persisted path of the last leaf.
    fn last_leaf_path(&self) -> Result<Option<Path>, StorageError>;

    /// Persists the path of the last leaf; `None` marks an empty tree.
    fn write_last_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError>;

    // BATCHES AND LIFECYCLE
    // --------------------------------------------------------------------------------------------

    /// Applies a batch of `DataSourceUpdates` to the storage backend.
    ///
    /// The default implementation runs the detach, move and attach phases with the single-item
    /// methods above. Backends which can write atomically should override it.
    fn apply(&self, updates: DataSourceUpdates<K, V>) -> Result<(), StorageError> {
        let DataSourceUpdateParts {
            hash_updates,
            removed_leaves,
            moved_leaves,
            leaf_updates,
            first_leaf_path,
            last_leaf_path,
        } = updates.into_parts();

        // detach
        for (path, _) in hash_updates.iter().filter(|(_, hash)| hash.is_none()) {
            self.delete_hash(*path)?;
        }
        for (key, path) in removed_leaves.iter() {
            self.delete_leaf(key, *path)?;
        }

        // move
        for (key, (old, new)) in moved_leaves.iter() {
            self.update_path(key, *old, *new)?;
        }

        // attach
        for (key, leaf) in leaf_updates.iter() {
            self.save_record(leaf.path, key, leaf.hash)?;
            self.save_leaf(key, leaf.path, &leaf.value)?;
        }
        for (path, hash) in hash_updates {
            if let Some(hash) = hash {
                self.save_hash(path, hash)?;
            }
        }
        self.write_first_leaf_path(first_leaf_path)?;
        self.write_last_leaf_path(last_leaf_path)
    }

    /// Flushes and releases the backend. Closing an already closed data source does nothing.
    fn close(&self) -> Result<(), StorageError>;

    /// Returns true once [`VirtualDataSource::close`] was called.
    fn is_closed(&self) -> bool;
}

// Blanket impl to allow any pointer to a `VirtualDataSource` to be used as a data source.
impl<P, T, K, V> VirtualDataSource<K, V> for P
where
    K: VirtualKey,
    V: VirtualValue,
    P: Deref<Target = T> + fmt::Debug + Send + Sync + 'static,
    T: VirtualDataSource<K, V> + ?Sized,
{
    #[inline]
    fn load_hash(&self, path: Path) -> Result<Option<Digest>, StorageError> {
        self.deref().load_hash(path)
    }
    #[inline]
    fn save_hash(&self, path: Path, hash: Digest) -> Result<(), StorageError> {
        self.deref().save_hash(path, hash)
    }
    #[inline]
    fn delete_hash(&self, path: Path) -> Result<(), StorageError> {
        self.deref().delete_hash(path)
    }

    #[inline]
    fn load_record(&self, path: Path) -> Result<Option<(K, Digest)>, StorageError> {
        self.deref().load_record(path)
    }
    #[inline]
    fn save_record(&self, path: Path, key: &K, hash: Digest) -> Result<(), StorageError> {
        self.deref().save_record(path, key, hash)
    }
    #[inline]
    fn delete_record(&self, path: Path) -> Result<(), StorageError> {
        self.deref().delete_record(path)
    }

    #[inline]
    fn load_value_by_key(&self, key: &K) -> Result<Option<V>, StorageError> {
        self.deref().load_value_by_key(key)
    }
    #[inline]
    fn load_path_by_key(&self, key: &K) -> Result<Option<Path>, StorageError> {
        self.deref().load_path_by_key(key)
    }
    #[inline]
    fn save_leaf(&self, key: &K, path: Path, value: &V) -> Result<(), StorageError> {
        self.deref().save_leaf(key, path, value)
    }
    #[inline]
    fn delete_leaf(&self, key: &K, path: Path) -> Result<(), StorageError> {
        self.deref().delete_leaf(key, path)
    }
    #[inline]
    fn update_path(&self, key: &K, old: Path, new: Path) -> Result<(), StorageError> {
        self.deref().update_path(key, old, new)
    }

    #[inline]
    fn first_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.deref().first_leaf_path()
    }
    #[inline]
    fn write_first_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        self.deref().write_first_leaf_path(path)
    }
    #[inline]
    fn last_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.deref().last_leaf_path()
    }
    #[inline]
    fn write_last_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        self.deref().write_last_leaf_path(path)
    }

    #[inline]
    fn apply(&self, updates: DataSourceUpdates<K, V>) -> Result<(), StorageError> {
        self.deref().apply(updates)
    }
    #[inline]
    fn close(&self) -> Result<(), StorageError> {
        self.deref().close()
    }
    #[inline]
    fn is_closed(&self) -> bool {
        self.deref().is_closed()
    }
}
