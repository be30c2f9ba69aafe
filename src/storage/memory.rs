use std::sync::{
    PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
};

use super::{DataSourceUpdateParts, DataSourceUpdates, StorageError, VirtualDataSource};
use crate::{
    Map,
    codec::{VirtualKey, VirtualValue},
    hash::Digest,
    merkle::Path,
};

/// In-memory data source for a virtual Merkle tree, implementing the `VirtualDataSource` trait.
///
/// Hashes, leaf records and the key index are kept in ordered maps. Access to them is
/// synchronized using `std::sync::RwLock`, so one writer and any number of snapshot readers may
/// share it.
///
/// It is primarily intended for scenarios where data persistence to disk is not a primary
/// concern, such as tests and short-lived trees.
#[derive(Debug)]
pub struct MemoryDataSource<K, V> {
    hashes: RwLock<Map<Path, Digest>>,
    records: RwLock<Map<Path, (K, Digest)>>,
    leaves: RwLock<Map<K, (Path, V)>>,
    leaf_paths: RwLock<(Option<Path>, Option<Path>)>,
    closed: AtomicBool,
}

impl<K: VirtualKey, V: VirtualValue> MemoryDataSource<K, V> {
    /// Creates a new, empty in-memory data source.
    pub fn new() -> Self {
        Self {
            hashes: RwLock::new(Map::new()),
            records: RwLock::new(Map::new()),
            leaves: RwLock::new(Map::new()),
            leaf_paths: RwLock::new((None, None)),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of internal node hashes currently stored.
    pub fn hash_count(&self) -> Result<usize, StorageError> {
        Ok(self.hashes.read()?.len())
    }

    /// Number of leaf records currently stored.
    pub fn record_count(&self) -> Result<usize, StorageError> {
        Ok(self.records.read()?.len())
    }

    /// Number of keys currently stored.
    pub fn leaf_count(&self) -> Result<usize, StorageError> {
        Ok(self.leaves.read()?.len())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl<K: VirtualKey, V: VirtualValue> Default for MemoryDataSource<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: VirtualKey, V: VirtualValue> VirtualDataSource<K, V> for MemoryDataSource<K, V> {
    fn load_hash(&self, path: Path) -> Result<Option<Digest>, StorageError> {
        self.ensure_open()?;
        Ok(self.hashes.read()?.get(&path).copied())
    }

    fn save_hash(&self, path: Path, hash: Digest) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.hashes.write()?.insert(path, hash);
        Ok(())
    }

    fn delete_hash(&self, path: Path) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.hashes.write()?.remove(&path);
        Ok(())
    }

    fn load_record(&self, path: Path) -> Result<Option<(K, Digest)>, StorageError> {
        self.ensure_open()?;
        Ok(self.records.read()?.get(&path).cloned())
    }

    fn save_record(&self, path: Path, key: &K, hash: Digest) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.records.write()?.insert(path, (key.clone(), hash));
        Ok(())
    }

    fn delete_record(&self, path: Path) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.records.write()?.remove(&path);
        Ok(())
    }

    fn load_value_by_key(&self, key: &K) -> Result<Option<V>, StorageError> {
        self.ensure_open()?;
        Ok(self.leaves.read()?.get(key).map(|(_, value)| value.clone()))
    }

    fn load_path_by_key(&self, key: &K) -> Result<Option<Path>, StorageError> {
        self.ensure_open()?;
        Ok(self.leaves.read()?.get(key).map(|(path, _)| *path))
    }

    fn save_leaf(&self, key: &K, path: Path, value: &V) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.leaves.write()?.insert(key.clone(), (path, value.clone()));
        Ok(())
    }

    fn delete_leaf(&self, key: &K, path: Path) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write()?;
        let mut leaves = self.leaves.write()?;
        remove_owned_record(&mut records, key, path);
        leaves.remove(key);
        Ok(())
    }

    fn update_path(&self, key: &K, old: Path, new: Path) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut records = self.records.write()?;
        let mut leaves = self.leaves.write()?;
        move_owned_record(&mut records, key, old, new);
        if let Some((path, _)) = leaves.get_mut(key) {
            *path = new;
        }
        Ok(())
    }

    fn first_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.ensure_open()?;
        Ok(self.leaf_paths.read()?.0)
    }

    fn write_first_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.leaf_paths.write()?.0 = path;
        Ok(())
    }

    fn last_leaf_path(&self) -> Result<Option<Path>, StorageError> {
        self.ensure_open()?;
        Ok(self.leaf_paths.read()?.1)
    }

    fn write_last_leaf_path(&self, path: Option<Path>) -> Result<(), StorageError> {
        self.ensure_open()?;
        self.leaf_paths.write()?.1 = path;
        Ok(())
    }

    /// Applies all phases of `updates` while holding every table lock, so readers observe
    /// either none or all of the batch.
    fn apply(&self, updates: DataSourceUpdates<K, V>) -> Result<(), StorageError> {
        self.ensure_open()?;
        let mut hashes = self.hashes.write()?;
        let mut records = self.records.write()?;
        let mut leaves = self.leaves.write()?;
        let mut leaf_paths = self.leaf_paths.write()?;

        let DataSourceUpdateParts {
            hash_updates,
            removed_leaves,
            moved_leaves,
            leaf_updates,
            first_leaf_path,
            last_leaf_path,
        } = updates.into_parts();

        for (path, _) in hash_updates.iter().filter(|(_, hash)| hash.is_none()) {
            hashes.remove(path);
        }
        for (key, path) in removed_leaves {
            remove_owned_record(&mut records, &key, path);
            leaves.remove(&key);
        }

        for (key, (old, new)) in moved_leaves {
            move_owned_record(&mut records, &key, old, new);
            if let Some((path, _)) = leaves.get_mut(&key) {
                *path = new;
            }
        }

        for (key, leaf) in leaf_updates {
            records.insert(leaf.path, (key.clone(), leaf.hash));
            leaves.insert(key, (leaf.path, leaf.value));
        }
        for (path, hash) in hash_updates {
            if let Some(hash) = hash {
                hashes.insert(path, hash);
            }
        }
        *leaf_paths = (first_leaf_path, last_leaf_path);
        Ok(())
    }

    fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

// HELPERS
// --------------------------------------------------------------------------------------------

fn remove_owned_record<K: PartialEq>(records: &mut Map<Path, (K, Digest)>, key: &K, path: Path) {
    if records.get(&path).is_some_and(|(owner, _)| owner == key) {
        records.remove(&path);
    }
}

fn move_owned_record<K: PartialEq>(
    records: &mut Map<Path, (K, Digest)>,
    key: &K,
    old: Path,
    new: Path,
) {
    if old == new || !records.get(&old).is_some_and(|(owner, _)| owner == key) {
        return;
    }
    if let Some(record) = records.remove(&old) {
        records.insert(new, record);
    }
}

// ERRORS
// --------------------------------------------------------------------------------------------

impl<T> From<PoisonError<T>> for StorageError {
    fn from(e: PoisonError<T>) -> Self {
        // Simple string-based error since we can't box PoisonError<T> directly
        // (T might not implement Send)
        #[derive(Debug)]
        struct LockError(String);

        impl std::fmt::Display for LockError {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::error::Error for LockError {}

        StorageError::Backend(Box::new(LockError(format!("lock poisoned: {e}"))))
    }
}
