use crate::merkle::PathError;

/// Errors returned by any `VirtualDataSource` implementation.
///
/// Categories:
/// - Backend errors (DB/I/O, lock poisoning)
/// - Length mismatches of stored entries, with expected and actual sizes
/// - Use of a data source after it was closed
/// - Higher-level value and path decode failures
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Backend I/O or database error (e.g., RocksDB).
    #[error("backend error: {0}")]
    Backend(#[from] Box<dyn core::error::Error + Send + Sync + 'static>),
    /// Value/metadata bytes had the wrong length (e.g., leaf record).
    #[error("invalid value length for {what}: expected {expected} bytes, found {found}")]
    BadValueLen {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    /// The data source was closed.
    #[error("data source is closed")]
    Closed,
    /// A stored path could not be decoded.
    #[error("failed to decode stored path")]
    Path(#[from] PathError),
    /// The requested operation is not supported by this backend.
    #[error("operation not supported: {0}")]
    Unsupported(String),
    /// Stored key or value bytes failed to decode.
    #[error("failed to decode value bytes")]
    Value(#[from] winter_utils::DeserializationError),
}
