use thiserror::Error;

use super::MAX_DEPTH;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("path depth {0} exceeds the maximum depth of {MAX_DEPTH}")]
    DepthTooBig(u64),
    #[error("index {value} is not valid for a path at depth {depth}")]
    InvalidPathIndex { depth: u8, value: u64 },
}
