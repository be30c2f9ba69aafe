use crate::{Map, hash::Digest, merkle::Path};

/// A leaf to be written under its final path, together with its record hash.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafUpdate<V> {
    pub path: Path,
    pub value: V,
    pub hash: Digest,
}

/// Owned decomposition of a [`DataSourceUpdates`] batch into its constituent parts.
#[derive(Debug)]
pub struct DataSourceUpdateParts<K, V> {
    /// Internal node hashes by path.
    ///
    /// `Some(hash)` indicates an insertion or update, while `None` indicates deletion.
    pub hash_updates: Map<Path, Option<Digest>>,

    /// Keys removed from the tree, with the path they were persisted under.
    pub removed_leaves: Map<K, Path>,

    /// Keys persisted under one path which now live under another: `(old, new)`.
    pub moved_leaves: Map<K, (Path, Path)>,

    /// New or modified leaves.
    pub leaf_updates: Map<K, LeafUpdate<V>>,

    /// First leaf path of the tree after applying all updates.
    pub first_leaf_path: Option<Path>,

    /// Last leaf path of the tree after applying all updates.
    pub last_leaf_path: Option<Path>,
}

/// A collection of changes produced by one commit, to be applied to a data source together.
///
/// Applying a batch runs in three phases so that leaves which swap or chain paths within one
/// commit never clobber each other's index entries:
/// 1. detach: delete removed internal hashes and removed leaves;
/// 2. move: re-key moved leaves from their old path to their new one;
/// 3. attach: write leaf records and values, internal hashes and the first/last leaf paths.
#[derive(Debug, Clone)]
pub struct DataSourceUpdates<K, V> {
    hash_updates: Map<Path, Option<Digest>>,
    removed_leaves: Map<K, Path>,
    moved_leaves: Map<K, (Path, Path)>,
    leaf_updates: Map<K, LeafUpdate<V>>,
    first_leaf_path: Option<Path>,
    last_leaf_path: Option<Path>,
}

impl<K: Ord, V> DataSourceUpdates<K, V> {
    /// Creates an empty batch which leaves the tree with the given first and last leaf paths.
    pub fn new(first_leaf_path: Option<Path>, last_leaf_path: Option<Path>) -> Self {
        Self {
            hash_updates: Map::new(),
            removed_leaves: Map::new(),
            moved_leaves: Map::new(),
            leaf_updates: Map::new(),
            first_leaf_path,
            last_leaf_path,
        }
    }

    /// Adds an internal node hash to the batch.
    pub fn insert_hash(&mut self, path: Path, hash: Digest) {
        self.hash_updates.insert(path, Some(hash));
    }

    /// Adds the removal of an internal node hash to the batch.
    ///
    /// A hash inserted for the same path, before or after, wins over the removal.
    pub fn remove_hash(&mut self, path: Path) {
        self.hash_updates.entry(path).or_insert(None);
    }

    /// Adds the removal of `key`, persisted under `path`, to the batch.
    pub fn remove_leaf(&mut self, key: K, path: Path) {
        self.removed_leaves.insert(key, path);
    }

    /// Records that `key` moved from `old` to `new`.
    pub fn move_leaf(&mut self, key: K, old: Path, new: Path) {
        self.moved_leaves.insert(key, (old, new));
    }

    /// Adds a leaf write to the batch.
    pub fn insert_leaf(&mut self, key: K, path: Path, value: V, hash: Digest) {
        self.leaf_updates.insert(key, LeafUpdate { path, value, hash });
    }

    /// Returns true if this batch changes nothing besides the first/last leaf paths.
    pub fn is_empty(&self) -> bool {
        self.hash_updates.is_empty()
            && self.removed_leaves.is_empty()
            && self.moved_leaves.is_empty()
            && self.leaf_updates.is_empty()
    }

    pub fn hash_updates(&self) -> &Map<Path, Option<Digest>> {
        &self.hash_updates
    }

    pub fn removed_leaves(&self) -> &Map<K, Path> {
        &self.removed_leaves
    }

    pub fn moved_leaves(&self) -> &Map<K, (Path, Path)> {
        &self.moved_leaves
    }

    pub fn leaf_updates(&self) -> &Map<K, LeafUpdate<V>> {
        &self.leaf_updates
    }

    pub fn first_leaf_path(&self) -> Option<Path> {
        self.first_leaf_path
    }

    pub fn last_leaf_path(&self) -> Option<Path> {
        self.last_leaf_path
    }

    /// Consumes this batch and returns its owned parts as a [`DataSourceUpdateParts`].
    pub fn into_parts(self) -> DataSourceUpdateParts<K, V> {
        DataSourceUpdateParts {
            hash_updates: self.hash_updates,
            removed_leaves: self.removed_leaves,
            moved_leaves: self.moved_leaves,
            leaf_updates: self.leaf_updates,
            first_leaf_path: self.first_leaf_path,
            last_leaf_path: self.last_leaf_path,
        }
    }
}
