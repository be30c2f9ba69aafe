use super::{Path, PathError, path::last_index_in_rank};

// SLOT KIND
// ================================================================================================

/// What occupies a path in a tree of a given shape.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SlotKind {
    Internal,
    Leaf,
    Absent,
}

// TREE SHAPE
// ================================================================================================

/// The layout of a virtual tree, fully described by the paths of its first and last leaves.
///
/// Leaves are filled strictly left to right, so every leaf lives in one of the two deepest
/// ranks. With `d` the depth of the first leaf:
/// - the leaves of rank `d` run from the first leaf to the end of the rank, or up to the last
///   leaf when it shares that rank;
/// - when the last leaf is at rank `d + 1`, the leaves of that rank run from index 0 up to it,
///   and they are the children of the rank `d` slots left of the first leaf;
/// - every other slot above the leaves is an internal node. The root is always internal.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct TreeShape {
    first: Option<Path>,
    last: Option<Path>,
}

/// How the tree changes when a key is appended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InsertStep {
    /// Path of the new leaf.
    pub leaf: Path,
    /// A leaf pushed one rank down to make room: `(from, to)`.
    pub displaced: Option<(Path, Path)>,
    /// Shape of the tree after the insertion.
    pub shape: TreeShape,
}

/// How the tree changes when its last leaf slot is vacated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RemoveStep {
    /// The leaf slot which disappears.
    pub vacated: Path,
    /// The sibling of the vacated slot, lifted into their parent: `(from, to)`. The parent turns
    /// from an internal node into a leaf.
    pub collapsed: Option<(Path, Path)>,
    /// Shape of the tree after the removal.
    pub shape: TreeShape,
}

impl TreeShape {
    /// Shape of a tree without leaves.
    pub const EMPTY: Self = Self { first: None, last: None };

    // CONSTRUCTORS
    // --------------------------------------------------------------------------------------------

    /// Builds a shape from persisted first and last leaf paths, returning `None` if the pair
    /// cannot describe a tree grown by [TreeShape::insert_step].
    pub fn new(first: Option<Path>, last: Option<Path>) -> Option<Self> {
        let shape = Self { first, last };
        match (first, last) {
            (None, None) => Some(shape),
            (Some(first), Some(last)) => {
                let single = first == last && first == Path::new_unchecked(1, 0);
                let single_rank = !first.is_root()
                    && last.depth() == first.depth()
                    && first.is_far_left()
                    && last.is_far_right();
                let two_ranks = !first.is_root()
                    && last.depth() == first.depth() + 1
                    && first.value() >= 1
                    && last.value() == 2 * first.value() - 1;
                (single || single_rank || two_ranks).then_some(shape)
            },
            _ => None,
        }
    }

    // PUBLIC ACCESSORS
    // --------------------------------------------------------------------------------------------

    /// Path of the leftmost leaf in the shallower of the two leaf ranks.
    pub fn first_leaf_path(&self) -> Option<Path> {
        self.first
    }

    /// Path of the most recently appended leaf.
    pub fn last_leaf_path(&self) -> Option<Path> {
        self.last
    }

    pub fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Number of leaves in the tree.
    pub fn len(&self) -> u64 {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return 0;
        };
        let upper_end = if last.depth() == first.depth() {
            last.value()
        } else {
            last_index_in_rank(first.depth())
        };
        let lower = if last.depth() == first.depth() { 0 } else { last.value() + 1 };
        upper_end - first.value() + 1 + lower
    }

    /// Returns what occupies `path` in a tree of this shape.
    pub fn classify(&self, path: Path) -> SlotKind {
        if path.is_root() {
            return SlotKind::Internal;
        }
        let (Some(first), Some(last)) = (self.first, self.last) else {
            return SlotKind::Absent;
        };
        let d = first.depth();
        match path.depth() {
            depth if depth < d => SlotKind::Internal,
            depth if depth == d => {
                if path.value() < first.value() {
                    SlotKind::Internal
                } else if last.depth() == d && path.value() > last.value() {
                    SlotKind::Absent
                } else {
                    SlotKind::Leaf
                }
            },
            depth if depth == d + 1 && last.depth() == depth && path.value() <= last.value() => {
                SlotKind::Leaf
            },
            _ => SlotKind::Absent,
        }
    }

    /// Returns every leaf path in order: the shallower rank first, each rank left to right.
    pub fn leaf_paths(&self) -> impl Iterator<Item = Path> {
        let mut ranks: Vec<(u8, u64, u64)> = Vec::with_capacity(2);
        if let (Some(first), Some(last)) = (self.first, self.last) {
            if last.depth() == first.depth() {
                ranks.push((first.depth(), first.value(), last.value()));
            } else {
                ranks.push((first.depth(), first.value(), last_index_in_rank(first.depth())));
                ranks.push((last.depth(), 0, last.value()));
            }
        }
        ranks.into_iter().flat_map(|(depth, start, end)| {
            (start..=end).map(move |value| Path::new_unchecked(depth, value))
        })
    }

    // GROWTH
    // --------------------------------------------------------------------------------------------

    /// Computes where the next appended leaf goes.
    ///
    /// # Errors
    /// Returns an error if the tree cannot grow another rank.
    pub fn insert_step(&self) -> Result<InsertStep, PathError> {
        let (Some(first), Some(last)) = (self.first, self.last) else {
            let leaf = Path::ROOT.left_child()?;
            return Ok(InsertStep {
                leaf,
                displaced: None,
                shape: Self { first: Some(leaf), last: Some(leaf) },
            });
        };

        if last.is_left() {
            let leaf = Path::new_unchecked(last.depth(), last.value() | 1);
            return Ok(InsertStep {
                leaf,
                displaced: None,
                shape: Self { first: self.first, last: Some(leaf) },
            });
        }

        let displaced_to = first.left_child()?;
        let leaf = first.right_child()?;
        let next_first = match first.next_in_rank() {
            Some(next) => next,
            None => Path::new(first.depth() + 1, 0)?,
        };
        Ok(InsertStep {
            leaf,
            displaced: Some((first, displaced_to)),
            shape: Self { first: Some(next_first), last: Some(leaf) },
        })
    }

    /// Computes how the tree shrinks when its last leaf slot is vacated, or `None` if the tree is
    /// empty. This is the exact inverse of [TreeShape::insert_step].
    pub fn remove_step(&self) -> Option<RemoveStep> {
        let (first, last) = (self.first?, self.last?);

        if first == last {
            return Some(RemoveStep { vacated: last, collapsed: None, shape: Self::EMPTY });
        }

        let parent = last.parent()?;
        if parent.is_root() {
            let remaining = Path::new_unchecked(1, 0);
            return Some(RemoveStep {
                vacated: last,
                collapsed: None,
                shape: Self { first: Some(remaining), last: Some(remaining) },
            });
        }

        let sibling = last.sibling()?;
        let next_last = if parent.is_far_left() {
            Path::new_unchecked(parent.depth(), last_index_in_rank(parent.depth()))
        } else {
            Path::new_unchecked(parent.depth() + 1, 2 * parent.value() - 1)
        };
        Some(RemoveStep {
            vacated: last,
            collapsed: Some((sibling, parent)),
            shape: Self { first: Some(parent), last: Some(next_last) },
        })
    }
}
