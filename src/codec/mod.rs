//! Canonical, length-checked binary encodings for tree keys and values.
//!
//! Every key and value stored in a [`crate::VirtualMap`] goes through
//! [`Serializable`]/[`Deserializable`]. Fixed-width types are written with no framing, so a
//! backend can rely on the encoded length being known from the type alone. [`Blob`] is the one
//! variable-length codec and carries a 4-byte big-endian length prefix.

use core::fmt::Debug;

use crate::utils::{Deserializable, Serializable};

mod blob;
pub use blob::{Blob, MAX_BLOB_LEN};

mod contract_key;
pub use contract_key::ContractKey;

mod fixed;
pub use fixed::FixedBytes;


// KEY AND VALUE BOUNDS
// ================================================================================================

/// Types which can be used as keys of a [`crate::VirtualMap`].
///
/// Keys need a total order so that the in-memory key cache and commit batches are deterministic.
pub trait VirtualKey:
    Serializable + Deserializable + Clone + Ord + Debug + Send + Sync + 'static
{
}

impl<T> VirtualKey for T where
    T: Serializable + Deserializable + Clone + Ord + Debug + Send + Sync + 'static
{
}

/// Types which can be stored as values of a [`crate::VirtualMap`].
///
/// A leaf's hash commits to the serialized bytes of its value.
pub trait VirtualValue:
    Serializable + Deserializable + Clone + PartialEq + Debug + Send + Sync + 'static
{
}

impl<T> VirtualValue for T where
    T: Serializable + Deserializable + Clone + PartialEq + Debug + Send + Sync + 'static
{
}
