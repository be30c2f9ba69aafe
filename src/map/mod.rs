//! A key-value map backed by a virtual Merkle tree.
//!
//! A [VirtualMap] keeps only the nodes touched by the current version in memory. Everything else
//! stays in the [VirtualDataSource] and is realized on demand, so the map can commit to data sets
//! far larger than memory.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    Map, MapEntry, Set,
    codec::{VirtualKey, VirtualValue},
    hash::{Digest, NULL_DIGEST},
    merkle::{InternalNode, LeafNode, Node, Path, SlotKind, TreeShape, internal_hash},
    storage::{DataSourceUpdates, VirtualDataSource},
};

mod error;
pub use error::{CorruptIndexError, VirtualMapError};

mod snapshot;
use snapshot::{Ancestors, Overlay, Preserver};

#[cfg(test)]
mod tests;

// CONSTANTS
// ================================================================================================

/// Number of top ranks whose two subtrees are hashed in parallel.
#[cfg(feature = "concurrent")]
const PARALLEL_HASH_DEPTH: u8 = 8;

#[cfg(not(feature = "concurrent"))]
const PARALLEL_HASH_DEPTH: u8 = 0;

// VIRTUAL MAP
// ================================================================================================

/// One version of a key-value map committed to by a balanced binary Merkle tree.
///
/// Leaves fill the tree left to right, so the tree is complete up to its last rank and its whole
/// layout is described by the paths of the first and last leaves (see [TreeShape]). Nodes are
/// held in an arena keyed by [Path]; a node missing from the arena is a "ghost" whose persisted
/// state is read from the data source when needed.
///
/// Mutations stay in memory until [VirtualMap::commit] writes them to the data source in a
/// single batch. [VirtualMap::copy] commits, freezes this version into a read-only snapshot and
/// returns the next mutable version over the same data source. Snapshots stay readable while
/// newer versions commit: the writer preserves the values it overwrites in the overlay of every
/// live snapshot.
///
/// Only one mutable version may exist per data source.
#[derive(Debug)]
pub struct VirtualMap<K, V, S> {
    data_source: Arc<S>,
    nodes: Map<Path, Node<K, V>>,
    leaf_paths: Map<K, Path>,
    deleted_leaves: Map<K, Path>,
    removed_internals: Set<Path>,
    shape: TreeShape,
    immutable: bool,
    overlay: Arc<Overlay<K, V>>,
    ancestors: Ancestors<K, V>,
}

impl<K: VirtualKey, V: VirtualValue, S: VirtualDataSource<K, V>> VirtualMap<K, V, S> {
    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Opens a map over `data_source`, which may already hold a committed tree.
    ///
    /// # Errors
    /// Returns an error if the data source cannot be read, or if its first and last leaf paths do
    /// not describe a tree.
    pub fn new(data_source: S) -> Result<Self, VirtualMapError> {
        Self::with_shared(Arc::new(data_source))
    }

    /// Opens a map over a data source which the caller keeps a handle to.
    ///
    /// [VirtualMap::release] does not close the data source while the caller's handle is alive.
    pub fn with_shared(data_source: Arc<S>) -> Result<Self, VirtualMapError> {
        let first = data_source.first_leaf_path()?;
        let last = data_source.last_leaf_path()?;
        let shape = TreeShape::new(first, last)
            .ok_or(CorruptIndexError::InconsistentLeafPaths { first, last })?;
        debug!(leaves = shape.len(), "opened virtual map");

        Ok(Self::from_parts(data_source, shape, Ancestors::new()))
    }

    fn from_parts(data_source: Arc<S>, shape: TreeShape, ancestors: Ancestors<K, V>) -> Self {
        Self {
            data_source,
            nodes: Map::new(),
            leaf_paths: Map::new(),
            deleted_leaves: Map::new(),
            removed_internals: Set::new(),
            shape,
            immutable: false,
            overlay: Arc::new(Overlay::new()),
            ancestors,
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Returns the number of keys in this version.
    pub fn len(&self) -> u64 {
        self.shape.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// Returns true once [VirtualMap::copy] froze this version.
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Returns true if this version holds changes which are not committed yet.
    pub fn is_dirty(&self) -> bool {
        !self.deleted_leaves.is_empty()
            || !self.removed_internals.is_empty()
            || self.nodes.values().any(Node::is_dirty)
    }

    pub fn first_leaf_path(&self) -> Option<Path> {
        self.shape.first_leaf_path()
    }

    pub fn last_leaf_path(&self) -> Option<Path> {
        self.shape.last_leaf_path()
    }

    pub fn data_source(&self) -> &S {
        &self.data_source
    }

    /// Returns the value stored under `key` in this version.
    ///
    /// Reads do not realize nodes, so they never change the in-memory state of the map.
    pub fn get(&self, key: &K) -> Result<Option<V>, VirtualMapError> {
        if let Some(path) = self.leaf_paths.get(key) {
            let leaf = self
                .nodes
                .get(path)
                .and_then(Node::as_leaf)
                .ok_or(CorruptIndexError::UnexpectedNode(*path))?;
            return Ok(Some(leaf.value().clone()));
        }
        if self.deleted_leaves.contains_key(key) {
            return Ok(None);
        }

        // the guard keeps a newer version from applying a commit in the middle of the lookup
        let overlay = self.overlay.read()?;
        if let Some(value) = overlay.get(key) {
            return Ok(value.clone());
        }
        Ok(self.data_source.load_value_by_key(key)?)
    }

    pub fn contains_key(&self, key: &K) -> Result<bool, VirtualMapError> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns the root hash of this version.
    ///
    /// Hashes of modified nodes are recomputed bottom-up but not cached, so this can be called
    /// on a shared snapshot. [VirtualMap::hash_mut] caches them.
    pub fn hash(&self) -> Result<Digest, VirtualMapError> {
        self.compute_hash(Path::ROOT, &mut Map::new(), PARALLEL_HASH_DEPTH)
    }

    /// Returns every key-value pair of this version in leaf order.
    ///
    /// # Errors
    /// Returns [VirtualMapError::SnapshotDiverged] if this is a snapshot and a newer version
    /// already committed changes to the shared data source.
    pub fn entries(&self) -> Result<Vec<(K, V)>, VirtualMapError> {
        let overlay = self.overlay.read()?;
        if !overlay.is_empty() {
            return Err(VirtualMapError::SnapshotDiverged);
        }

        let mut entries = Vec::new();
        for path in self.shape.leaf_paths() {
            let (key, value) = match self.nodes.get(&path) {
                Some(Node::Leaf(leaf)) => (leaf.key().clone(), leaf.value().clone()),
                Some(Node::Internal(_)) => {
                    return Err(CorruptIndexError::UnexpectedNode(path).into());
                },
                None => {
                    let (key, _) = self.load_record(path)?;
                    let value = self.load_value(&key, path)?;
                    (key, value)
                },
            };
            entries.push((key, value));
        }
        Ok(entries)
    }

    /// Renders the tree one rank per line.
    ///
    /// Internal nodes are shown as `I`, leaves as `L` followed by their key. Nodes with
    /// uncommitted changes are marked with `*`.
    pub fn to_text(&self) -> Result<String, VirtualMapError> {
        let overlay = self.overlay.read()?;
        if !overlay.is_empty() {
            return Err(VirtualMapError::SnapshotDiverged);
        }

        let Some(last) = self.shape.last_leaf_path() else {
            return Ok(String::from("(empty)\n"));
        };

        let mut text = String::new();
        for depth in 0..=last.depth() {
            let end = if depth == last.depth() {
                last.value()
            } else {
                (1_u64 << depth) - 1
            };
            text.push_str(&depth.to_string());
            text.push(':');
            for value in 0..=end {
                let path = Path::new(depth, value)?;
                let node = self.nodes.get(&path);
                let dirty = if node.is_some_and(Node::is_dirty) { "*" } else { "" };
                let token = match (self.shape.classify(path), node) {
                    (SlotKind::Absent, _) => continue,
                    (_, Some(Node::Leaf(leaf))) => format!(" L{dirty}({:?})", leaf.key()),
                    (SlotKind::Leaf, None) => format!(" L({:?})", self.load_record(path)?.0),
                    (_, _) => format!(" I{dirty}"),
                };
                text.push_str(&token);
            }
            text.push('\n');
        }
        Ok(text)
    }

    // STATE MUTATORS
    // --------------------------------------------------------------------------------------------

    /// Returns the root hash of this version and caches every recomputed hash in the arena.
    ///
    /// Later calls only rehash the paths changed since. With the `concurrent` feature the
    /// subtrees of the top ranks are hashed in parallel.
    pub fn hash_mut(&mut self) -> Result<Digest, VirtualMapError> {
        for node in self.nodes.values_mut() {
            if let Node::Leaf(leaf) = node {
                leaf.hash();
            }
        }

        let mut memo = Map::new();
        let root = self.compute_hash(Path::ROOT, &mut memo, PARALLEL_HASH_DEPTH)?;
        for (path, hash) in memo {
            if let Some(node) = self.nodes.get_mut(&path).and_then(Node::as_internal_mut) {
                node.set_hash(hash);
            }
        }
        Ok(root)
    }

    /// Stores `value` under `key` and returns the previous value, if any.
    ///
    /// A new key is appended as the next leaf of the tree. If the last rank is full, the leaf at
    /// the first leaf path is pushed one rank down to make room.
    ///
    /// # Panics
    /// Panics if this version is immutable.
    pub fn put(&mut self, key: K, value: V) -> Result<Option<V>, VirtualMapError> {
        self.assert_mutable("put");

        if let Some(path) = self.realize_leaf(&key)? {
            let old = self.leaf_mut(path)?.set_value(value);
            self.invalidate_ancestors(path)?;
            return Ok(Some(old));
        }

        let step = self.shape.insert_step()?;
        if let Some((from, to)) = step.displaced {
            self.realize_leaf_at(from)?;
            let leaf = self.take_leaf(from)?;
            self.place_leaf(leaf, to);
            self.nodes.insert(from, InternalNode::new(from).into());
        }

        self.nodes.insert(step.leaf, LeafNode::new(step.leaf, key.clone(), value).into());
        self.leaf_paths.insert(key, step.leaf);
        self.shape = step.shape;
        self.invalidate_ancestors(step.leaf)?;
        Ok(None)
    }

    /// Removes `key` and returns its value, if it was present.
    ///
    /// The last leaf moves into the slot of the removed key. If the last slot leaves its parent
    /// with a single child, that child is lifted into the parent, so the tree shrinks exactly as
    /// it grew.
    ///
    /// # Panics
    /// Panics if this version is immutable.
    pub fn delete(&mut self, key: &K) -> Result<Option<V>, VirtualMapError> {
        self.assert_mutable("delete");

        let Some(path) = self.realize_leaf(key)? else {
            return Ok(None);
        };
        let step = self.shape.remove_step().ok_or(CorruptIndexError::UnexpectedNode(path))?;

        let removed = self.take_leaf(path)?;
        self.leaf_paths.remove(key);
        if let Some(persisted) = removed.persisted_path() {
            self.deleted_leaves.entry(key.clone()).or_insert(persisted);
        }

        let mut filled = None;
        if path != step.vacated {
            self.realize_leaf_at(step.vacated)?;
            let last = self.take_leaf(step.vacated)?;
            self.place_leaf(last, path);
            filled = Some(path);
        }

        match step.collapsed {
            Some((sibling, parent)) => {
                self.realize_leaf_at(sibling)?;
                let leaf = self.take_leaf(sibling)?;
                self.place_leaf(leaf, parent);
                self.removed_internals.insert(parent);
                if filled == Some(sibling) {
                    filled = Some(parent);
                }
                self.invalidate_ancestors(parent)?;
            },
            None => self.invalidate_ancestors(step.vacated)?,
        }
        if let Some(path) = filled {
            self.invalidate_ancestors(path)?;
        }
        self.shape = step.shape;

        Ok(Some(removed.into_parts().1))
    }

    /// Writes every change of this version to the data source.
    ///
    /// Dirty hashes are computed bottom-up, values about to be overwritten are preserved for
    /// the live snapshots, and the changes are applied as one [DataSourceUpdates] batch.
    /// Afterwards only the root stays realized.
    ///
    /// # Panics
    /// Panics if this version is immutable.
    pub fn commit(&mut self) -> Result<(), VirtualMapError> {
        self.assert_mutable("commit");

        let root_hash = self.hash_mut()?;

        let mut updates =
            DataSourceUpdates::new(self.shape.first_leaf_path(), self.shape.last_leaf_path());
        let mut touched = Vec::new();
        for path in self.removed_internals.iter() {
            updates.remove_hash(*path);
        }
        for (key, path) in self.deleted_leaves.iter() {
            updates.remove_leaf(key.clone(), *path);
            touched.push(key.clone());
        }
        for node in self.nodes.values_mut() {
            match node {
                Node::Internal(node) if node.is_dirty() => {
                    let path = node.path();
                    let hash = node.hash().ok_or(CorruptIndexError::MissingHash(path))?;
                    updates.insert_hash(path, hash);
                },
                Node::Leaf(leaf) if leaf.is_dirty() => {
                    let hash = leaf.hash();
                    if let Some(persisted) = leaf.persisted_path().filter(|_| leaf.is_moved()) {
                        updates.move_leaf(leaf.key().clone(), persisted, leaf.path());
                    }
                    let (key, value) = (leaf.key().clone(), leaf.value().clone());
                    updates.insert_leaf(key, leaf.path(), value, hash);
                    touched.push(leaf.key().clone());
                },
                _ => {},
            }
        }

        let (hashes, removed, moved) = (
            updates.hash_updates().len(),
            updates.removed_leaves().len(),
            updates.moved_leaves().len(),
        );

        // snapshots keep their overlays locked until the batch is applied
        let live = self.ancestors.live();
        let mut preserver = Preserver::lock(&live)?;
        for key in touched.iter() {
            if preserver.needs(key) {
                let old = self.data_source.load_value_by_key(key)?;
                preserver.preserve(key, old);
            }
        }
        self.data_source.apply(updates)?;
        drop(preserver);

        self.nodes.retain(|path, _| path.is_root());
        if let MapEntry::Vacant(entry) = self.nodes.entry(Path::ROOT) {
            entry.insert(InternalNode::new(Path::ROOT).into());
        }
        if let Some(root) = self.nodes.get_mut(&Path::ROOT).and_then(Node::as_internal_mut) {
            root.set_hash(root_hash);
            root.mark_persisted();
        }
        self.leaf_paths.clear();
        self.deleted_leaves.clear();
        self.removed_internals.clear();

        debug!(
            leaves = self.shape.len(),
            hashes,
            removed,
            moved,
            snapshots = live.len(),
            root = %root_hash,
            "committed virtual map"
        );
        Ok(())
    }

    /// Freezes this version into a snapshot and returns the next mutable version.
    ///
    /// Pending changes are committed first. The snapshot keeps answering [VirtualMap::get] and
    /// [VirtualMap::hash] with the state it had at the time of the copy.
    ///
    /// # Panics
    /// Panics if this version is immutable.
    pub fn copy(&mut self) -> Result<Self, VirtualMapError> {
        self.commit()?;
        self.immutable = true;

        let ancestors = self.ancestors.inherit(&self.overlay);
        debug!(leaves = self.shape.len(), "copied virtual map");
        Ok(Self::from_parts(Arc::clone(&self.data_source), self.shape, ancestors))
    }

    /// Drops this version and closes the data source if no other version uses it.
    pub fn release(self) -> Result<(), VirtualMapError> {
        if let Some(data_source) = Arc::into_inner(self.data_source) {
            data_source.close()?;
            debug!("closed data source of released virtual map");
        }
        Ok(())
    }

    // HELPER METHODS
    // --------------------------------------------------------------------------------------------

    fn assert_mutable(&self, operation: &str) {
        assert!(!self.immutable, "{operation} called on an immutable version of a virtual map");
    }

    /// Hash of the node at `path`. Freshly computed hashes of internal nodes go into `memo`.
    ///
    /// Internal nodes above `split_depth` hash their two subtrees in parallel.
    fn compute_hash(
        &self,
        path: Path,
        memo: &mut Map<Path, Digest>,
        split_depth: u8,
    ) -> Result<Digest, VirtualMapError> {
        match self.nodes.get(&path) {
            Some(Node::Leaf(leaf)) => Ok(leaf.current_hash()),
            Some(Node::Internal(node)) => {
                if let Some(hash) = node.hash().or_else(|| memo.get(&path).copied()) {
                    return Ok(hash);
                }
                let (left, right) = (path.left_child()?, path.right_child()?);
                let (left, right) = if path.depth() < split_depth {
                    let mut right_memo = Map::new();
                    let (left, right) = join(
                        || self.compute_hash(left, memo, split_depth),
                        || self.compute_hash(right, &mut right_memo, split_depth),
                    );
                    memo.append(&mut right_memo);
                    (left?, right?)
                } else {
                    (
                        self.compute_hash(left, memo, split_depth)?,
                        self.compute_hash(right, memo, split_depth)?,
                    )
                };
                let hash = internal_hash(left, right);
                memo.insert(path, hash);
                Ok(hash)
            },
            None => self.ghost_hash(path),
        }
    }

    /// Hash of a node which is not realized, read from the data source.
    fn ghost_hash(&self, path: Path) -> Result<Digest, VirtualMapError> {
        match self.shape.classify(path) {
            SlotKind::Absent => Ok(NULL_DIGEST),
            SlotKind::Internal if self.shape.is_empty() => Ok(empty_root_hash()),
            SlotKind::Internal => {
                Ok(self.data_source.load_hash(path)?.ok_or(CorruptIndexError::MissingHash(path))?)
            },
            SlotKind::Leaf => Ok(self.load_record(path)?.1),
        }
    }

    fn load_record(&self, path: Path) -> Result<(K, Digest), VirtualMapError> {
        Ok(self.data_source.load_record(path)?.ok_or(CorruptIndexError::MissingRecord(path))?)
    }

    fn load_value(&self, key: &K, path: Path) -> Result<V, VirtualMapError> {
        Ok(self.data_source.load_value_by_key(key)?.ok_or(CorruptIndexError::MissingValue(path))?)
    }

    /// Realizes the leaf of `key` and returns its path, or `None` if the key is absent.
    fn realize_leaf(&mut self, key: &K) -> Result<Option<Path>, VirtualMapError> {
        if let Some(path) = self.leaf_paths.get(key) {
            return Ok(Some(*path));
        }
        if self.deleted_leaves.contains_key(key) {
            return Ok(None);
        }
        let Some(path) = self.data_source.load_path_by_key(key)? else {
            return Ok(None);
        };

        // keys which are neither cached nor deleted still sit in untouched slots
        if self.shape.classify(path) != SlotKind::Leaf || self.nodes.contains_key(&path) {
            return Err(CorruptIndexError::UnexpectedNode(path).into());
        }
        let (owner, hash) = self.load_record(path)?;
        if &owner != key {
            return Err(CorruptIndexError::MisplacedLeaf(path).into());
        }
        let value = self.load_value(key, path)?;

        trace!(%path, "realized leaf by key");
        self.nodes.insert(path, LeafNode::from_persisted(path, key.clone(), value, hash).into());
        self.leaf_paths.insert(key.clone(), path);
        Ok(Some(path))
    }

    /// Makes sure the leaf slot at `path` is realized.
    fn realize_leaf_at(&mut self, path: Path) -> Result<(), VirtualMapError> {
        match self.nodes.get(&path) {
            Some(Node::Leaf(_)) => return Ok(()),
            Some(Node::Internal(_)) => return Err(CorruptIndexError::UnexpectedNode(path).into()),
            None => {},
        }

        let (key, hash) = self.load_record(path)?;
        if self.leaf_paths.contains_key(&key) || self.deleted_leaves.contains_key(&key) {
            return Err(CorruptIndexError::MisplacedLeaf(path).into());
        }
        let value = self.load_value(&key, path)?;

        trace!(%path, "realized leaf by path");
        self.leaf_paths.insert(key.clone(), path);
        self.nodes.insert(path, LeafNode::from_persisted(path, key, value, hash).into());
        Ok(())
    }

    fn leaf_mut(&mut self, path: Path) -> Result<&mut LeafNode<K, V>, VirtualMapError> {
        Ok(self
            .nodes
            .get_mut(&path)
            .and_then(Node::as_leaf_mut)
            .ok_or(CorruptIndexError::UnexpectedNode(path))?)
    }

    /// Removes the realized leaf at `path` from the arena. Its key stays cached.
    fn take_leaf(&mut self, path: Path) -> Result<LeafNode<K, V>, VirtualMapError> {
        match self.nodes.remove(&path) {
            Some(Node::Leaf(leaf)) => Ok(leaf),
            Some(node) => {
                self.nodes.insert(path, node);
                Err(CorruptIndexError::UnexpectedNode(path).into())
            },
            None => Err(CorruptIndexError::MissingRecord(path).into()),
        }
    }

    /// Puts `leaf` into the arena at `path`, replacing whatever node was there.
    fn place_leaf(&mut self, mut leaf: LeafNode<K, V>, path: Path) {
        trace!(from = %leaf.path(), to = %path, "moved leaf");
        leaf.adopt(path);
        self.leaf_paths.insert(leaf.key().clone(), path);
        self.nodes.insert(path, leaf.into());
    }

    /// Drops the cached hash of every ancestor of `path`, realizing ancestors as needed.
    fn invalidate_ancestors(&mut self, path: Path) -> Result<(), VirtualMapError> {
        for ancestor in path.ancestors() {
            match self.nodes.entry(ancestor) {
                MapEntry::Vacant(entry) => {
                    entry.insert(InternalNode::new(ancestor).into());
                },
                MapEntry::Occupied(mut entry) => match entry.get_mut() {
                    Node::Internal(node) => node.invalidate_hash(),
                    Node::Leaf(_) => {
                        return Err(CorruptIndexError::UnexpectedNode(ancestor).into());
                    },
                },
            }
        }
        Ok(())
    }
}

// HELPER FUNCTIONS
// ================================================================================================

/// Root hash of a map without keys.
pub fn empty_root_hash() -> Digest {
    internal_hash(NULL_DIGEST, NULL_DIGEST)
}

#[cfg(feature = "concurrent")]
fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA + Send,
    B: FnOnce() -> RB + Send,
    RA: Send,
    RB: Send,
{
    rayon::join(a, b)
}

#[cfg(not(feature = "concurrent"))]
fn join<A, B, RA, RB>(a: A, b: B) -> (RA, RB)
where
    A: FnOnce() -> RA,
    B: FnOnce() -> RB,
{
    (a(), b())
}
