use core::fmt::{self, Display};

use super::PathError;
use crate::utils::{ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable};

// CONSTANTS
// ================================================================================================

/// Deepest rank a [Path] can address.
pub const MAX_DEPTH: u8 = 63;

/// Length of the compact key encoding of a [Path]: one depth byte and the big-endian index.
pub const PATH_KEY_BYTES: usize = 9;

// PATH
// ================================================================================================

/// Address of a node in the virtual binary tree.
///
/// A path is a `depth` together with the turns taken from the root to reach the node, packed
/// into the low `depth` bits of `value`. The most recent turn is the least-significant bit, with
/// `0` for left and `1` for right. As a consequence `value` is also the zero-based position of
/// the node within its rank, counted left to right.
///
/// Paths order by depth first and then left to right within a rank.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    depth: u8,
    value: u64,
}

impl Path {
    /// Path of the root node.
    pub const ROOT: Self = Self { depth: 0, value: 0 };

    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Creates a new path from a depth and an index within that rank.
    ///
    /// # Errors
    /// Returns an error if `depth` exceeds [MAX_DEPTH] or if `value` is not less than
    /// `2^depth`.
    pub const fn new(depth: u8, value: u64) -> Result<Self, PathError> {
        if depth > MAX_DEPTH {
            return Err(PathError::DepthTooBig(depth as u64));
        }
        if value > last_index_in_rank(depth) {
            return Err(PathError::InvalidPathIndex { depth, value });
        }
        Ok(Self { depth, value })
    }

    /// Creates a new path without checking its validity.
    pub const fn new_unchecked(depth: u8, value: u64) -> Self {
        debug_assert!(depth <= MAX_DEPTH);
        debug_assert!(value <= last_index_in_rank(depth));
        Self { depth, value }
    }

    /// Creates the path of the `index`-th node (from the left) at rank `depth`.
    pub const fn from_rank_and_index(depth: u8, index: u64) -> Result<Self, PathError> {
        Self::new(depth, index)
    }

    /// Creates the rightmost path at rank `depth`.
    pub const fn far_right(depth: u8) -> Result<Self, PathError> {
        if depth > MAX_DEPTH {
            return Err(PathError::DepthTooBig(depth as u64));
        }
        Ok(Self { depth, value: last_index_in_rank(depth) })
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    pub const fn is_root(&self) -> bool {
        self.depth == 0
    }

    pub const fn depth(&self) -> u8 {
        self.depth
    }

    pub const fn value(&self) -> u64 {
        self.value
    }

    /// Zero-based position of this node within its rank, left to right.
    pub const fn index_in_rank(&self) -> u64 {
        self.value
    }

    /// Returns true if this is the left child of its parent. The root is neither left nor right.
    pub const fn is_left(&self) -> bool {
        self.depth > 0 && self.value & 1 == 0
    }

    /// Returns true if this is the right child of its parent. The root is neither left nor right.
    pub const fn is_right(&self) -> bool {
        self.depth > 0 && self.value & 1 == 1
    }

    /// Returns true if this is the leftmost node of its rank.
    pub const fn is_far_left(&self) -> bool {
        self.value == 0
    }

    /// Returns true if this is the rightmost node of its rank.
    pub const fn is_far_right(&self) -> bool {
        self.value == last_index_in_rank(self.depth)
    }

    /// Returns true if this path sorts before `other`.
    pub fn is_left_of(&self, other: &Self) -> bool {
        self < other
    }

    /// Returns true if this path sorts after `other`.
    pub fn is_right_of(&self, other: &Self) -> bool {
        self > other
    }

    // NAVIGATION
    // --------------------------------------------------------------------------------------------

    /// Returns the parent of this path, or `None` for the root.
    pub const fn parent(&self) -> Option<Self> {
        if self.depth == 0 {
            return None;
        }
        Some(Self { depth: self.depth - 1, value: self.value >> 1 })
    }

    /// Returns the left child of this path.
    ///
    /// # Errors
    /// Returns an error if the child would be deeper than [MAX_DEPTH].
    pub const fn left_child(&self) -> Result<Self, PathError> {
        self.child(false)
    }

    /// Returns the right child of this path.
    ///
    /// # Errors
    /// Returns an error if the child would be deeper than [MAX_DEPTH].
    pub const fn right_child(&self) -> Result<Self, PathError> {
        self.child(true)
    }

    /// Returns the left or the right child of this path.
    pub const fn child(&self, is_right: bool) -> Result<Self, PathError> {
        if self.depth >= MAX_DEPTH {
            return Err(PathError::DepthTooBig(self.depth as u64 + 1));
        }
        Ok(Self {
            depth: self.depth + 1,
            value: (self.value << 1) | is_right as u64,
        })
    }

    /// Returns the other child of this path's parent, or `None` for the root.
    pub const fn sibling(&self) -> Option<Self> {
        if self.depth == 0 {
            return None;
        }
        Some(Self { depth: self.depth, value: self.value ^ 1 })
    }

    /// Returns the next path to the right within the same rank, if any.
    pub const fn next_in_rank(&self) -> Option<Self> {
        if self.is_far_right() {
            return None;
        }
        Some(Self { depth: self.depth, value: self.value + 1 })
    }

    /// Returns an iterator over the ancestors of this path, from its parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> {
        core::iter::successors(self.parent(), Path::parent)
    }

    // KEY ENCODING
    // --------------------------------------------------------------------------------------------

    /// Encodes this path as `[depth][u64 big-endian index]`.
    ///
    /// Byte-wise order of the encoding matches the ordering of paths.
    pub fn to_key_bytes(&self) -> [u8; PATH_KEY_BYTES] {
        let mut bytes = [0u8; PATH_KEY_BYTES];
        bytes[0] = self.depth;
        bytes[1..].copy_from_slice(&self.value.to_be_bytes());
        bytes
    }

    /// Decodes a path produced by [Path::to_key_bytes].
    pub fn from_key_bytes(bytes: [u8; PATH_KEY_BYTES]) -> Result<Self, PathError> {
        let mut value = [0u8; 8];
        value.copy_from_slice(&bytes[1..]);
        Self::new(bytes[0], u64::from_be_bytes(value))
    }
}

/// Index of the rightmost node at rank `depth`.
pub(super) const fn last_index_in_rank(depth: u8) -> u64 {
    if depth == 0 { 0 } else { u64::MAX >> (64 - depth as u32) }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.depth == 0 {
            return write!(f, "(0, root)");
        }
        write!(f, "({}, {:0width$b})", self.depth, self.value, width = self.depth as usize)
    }
}

// SERIALIZATION
// ================================================================================================

impl Serializable for Path {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        target.write_bytes(&self.to_key_bytes());
    }

    fn get_size_hint(&self) -> usize {
        PATH_KEY_BYTES
    }
}

impl Deserializable for Path {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        let bytes = source.read_array::<PATH_KEY_BYTES>()?;
        Self::from_key_bytes(bytes)
            .map_err(|err| DeserializationError::InvalidValue(err.to_string()))
    }
}
