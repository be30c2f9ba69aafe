use super::Path;
use crate::{
    codec::{VirtualKey, VirtualValue},
    hash::{Blake3_256, Digest},
};

/// Content hash of a leaf: the hash of its value's serialized bytes.
pub fn leaf_hash<V: VirtualValue>(value: &V) -> Digest {
    Blake3_256::hash(&value.to_bytes())
}

// INTERNAL NODE
// ================================================================================================

/// An internal node realized in memory.
///
/// Children are not stored: they are found in the arena at `path.left_child()` and
/// `path.right_child()`. The cached hash is `None` whenever a descendant changed since the hash
/// was last computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    path: Path,
    hash: Option<Digest>,
    dirty: bool,
}

impl InternalNode {
    /// Creates a node which has never been persisted.
    pub fn new(path: Path) -> Self {
        Self { path, hash: None, dirty: true }
    }

    /// Creates a node from a hash read out of the data source.
    pub fn from_persisted(path: Path, hash: Digest) -> Self {
        Self { path, hash: Some(hash), dirty: false }
    }

    pub fn path(&self) -> Path {
        self.path
    }

    /// Returns the cached hash if it is still valid.
    pub fn hash(&self) -> Option<Digest> {
        self.hash
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drops the cached hash and marks the node as needing to be persisted.
    pub fn invalidate_hash(&mut self) {
        self.hash = None;
        self.dirty = true;
    }

    /// Caches a freshly computed hash. The node stays dirty until it is persisted.
    pub fn set_hash(&mut self, hash: Digest) {
        self.hash = Some(hash);
    }

    /// Marks the node as matching its persisted state.
    pub fn mark_persisted(&mut self) {
        debug_assert!(self.hash.is_some(), "internal node persisted without a hash");
        self.dirty = false;
    }
}

// LEAF NODE
// ================================================================================================

/// A leaf realized in memory.
///
/// `persisted_path` is the path under which the data source currently files this leaf, or `None`
/// if it was created in this version. When it differs from `path` the leaf has moved and the
/// next commit re-keys it.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode<K, V> {
    path: Path,
    persisted_path: Option<Path>,
    key: K,
    value: V,
    hash: Option<Digest>,
    dirty: bool,
}

impl<K: VirtualKey, V: VirtualValue> LeafNode<K, V> {
    /// Creates a leaf which has never been persisted.
    pub fn new(path: Path, key: K, value: V) -> Self {
        Self {
            path,
            persisted_path: None,
            key,
            value,
            hash: None,
            dirty: true,
        }
    }

    /// Creates a leaf from a record and a value read out of the data source.
    pub fn from_persisted(path: Path, key: K, value: V, hash: Digest) -> Self {
        Self {
            path,
            persisted_path: Some(path),
            key,
            value,
            hash: Some(hash),
            dirty: false,
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub fn path(&self) -> Path {
        self.path
    }

    pub fn persisted_path(&self) -> Option<Path> {
        self.persisted_path
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns true if the leaf was persisted under a different path than the one it has now.
    pub fn is_moved(&self) -> bool {
        self.persisted_path.is_some_and(|persisted| persisted != self.path)
    }

    /// Returns the hash of this leaf, computing and caching it if needed.
    pub fn hash(&mut self) -> Digest {
        *self.hash.get_or_insert_with(|| leaf_hash(&self.value))
    }

    /// Returns the cached hash, or computes it without caching.
    pub fn current_hash(&self) -> Digest {
        self.hash.unwrap_or_else(|| leaf_hash(&self.value))
    }

    // STATE MUTATORS
    // --------------------------------------------------------------------------------------------

    /// Replaces the value of this leaf and returns the previous one.
    ///
    /// Ancestors are left untouched; the caller invalidates them.
    pub fn set_value(&mut self, value: V) -> V {
        self.hash = None;
        self.dirty = true;
        core::mem::replace(&mut self.value, value)
    }

    /// Moves this leaf to `path`.
    pub fn adopt(&mut self, path: Path) {
        if self.path != path {
            self.path = path;
            self.dirty = true;
        }
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

// NODE
// ================================================================================================

/// A node of the arena: either an internal node or a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Node<K, V> {
    Internal(InternalNode),
    Leaf(LeafNode<K, V>),
}

impl<K: VirtualKey, V: VirtualValue> Node<K, V> {
    pub fn path(&self) -> Path {
        match self {
            Node::Internal(node) => node.path(),
            Node::Leaf(leaf) => leaf.path(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Node::Internal(node) => node.is_dirty(),
            Node::Leaf(leaf) => leaf.is_dirty(),
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode<K, V>> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_leaf_mut(&mut self) -> Option<&mut LeafNode<K, V>> {
        match self {
            Node::Leaf(leaf) => Some(leaf),
            Node::Internal(_) => None,
        }
    }

    pub fn as_internal(&self) -> Option<&InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }

    pub fn as_internal_mut(&mut self) -> Option<&mut InternalNode> {
        match self {
            Node::Internal(node) => Some(node),
            Node::Leaf(_) => None,
        }
    }
}

impl<K, V> From<InternalNode> for Node<K, V> {
    fn from(node: InternalNode) -> Self {
        Node::Internal(node)
    }
}

impl<K, V> From<LeafNode<K, V>> for Node<K, V> {
    fn from(leaf: LeafNode<K, V>) -> Self {
        Node::Leaf(leaf)
    }
}
