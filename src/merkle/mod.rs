//! Addressing and node types of the virtual binary Merkle tree.

use crate::hash::{Blake3_256, Digest};

// SUBMODULES
// ================================================================================================

mod error;
mod node;
mod path;
mod shape;


// REEXPORTS
// ================================================================================================

pub use error::PathError;
pub use node::{InternalNode, LeafNode, Node, leaf_hash};
pub use path::{MAX_DEPTH, PATH_KEY_BYTES, Path};
pub use shape::{InsertStep, RemoveStep, SlotKind, TreeShape};

// HELPER FUNCTIONS
// ================================================================================================

/// Hash of an internal node given the hashes of its children.
#[inline]
pub fn internal_hash(left: Digest, right: Digest) -> Digest {
    Blake3_256::merge(&[left, right])
}
