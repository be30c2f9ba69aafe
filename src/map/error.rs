use thiserror::Error;

use crate::{
    merkle::{Path, PathError},
    storage::StorageError,
};

/// The data source disagrees with itself or with the shape of the tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorruptIndexError {
    #[error("no hash is stored for internal node {0}")]
    MissingHash(Path),
    #[error("no record is stored for leaf {0}")]
    MissingRecord(Path),
    #[error("no value is stored for the key of leaf {0}")]
    MissingValue(Path),
    #[error("the record at {0} belongs to a different key")]
    MisplacedLeaf(Path),
    #[error("first leaf path {first:?} and last leaf path {last:?} do not describe a tree")]
    InconsistentLeafPaths { first: Option<Path>, last: Option<Path> },
    #[error("the node at {0} is not of the kind the tree shape requires")]
    UnexpectedNode(Path),
}

#[derive(Debug, Error)]
pub enum VirtualMapError {
    #[error("invalid tree path")]
    Path(#[from] PathError),
    #[error("data source operation failed")]
    Storage(#[from] StorageError),
    #[error("data source index is corrupt")]
    CorruptIndex(#[from] CorruptIndexError),
    #[error("the data source layout changed since this snapshot was taken")]
    SnapshotDiverged,
}
