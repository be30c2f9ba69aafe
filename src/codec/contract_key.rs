use core::fmt;

use crate::{
    utils::{ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable},
    word::Word256,
};

// CONTRACT KEY
// ================================================================================================

/// A storage slot of a contract: the owning contract's id paired with a 256-bit slot word.
///
/// Encoded as the contract id (8 bytes, big-endian) followed by the 32 slot bytes. Keys order by
/// contract first, so all slots of one contract are adjacent.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContractKey {
    contract_id: u64,
    slot: Word256,
}

impl ContractKey {
    /// The serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = 8 + Word256::SERIALIZED_SIZE;

    pub const fn new(contract_id: u64, slot: Word256) -> Self {
        Self { contract_id, slot }
    }

    pub const fn contract_id(&self) -> u64 {
        self.contract_id
    }

    pub const fn slot(&self) -> Word256 {
        self.slot
    }
}

impl fmt::Debug for ContractKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContractKey({}, {})", self.contract_id, self.slot)
    }
}

impl Serializable for ContractKey {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        target.write_bytes(&self.contract_id.to_be_bytes());
        self.slot.write_into(target);
    }

    fn get_size_hint(&self) -> usize {
        Self::SERIALIZED_SIZE
    }
}

impl Deserializable for ContractKey {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        let contract_id = u64::from_be_bytes(source.read_array()?);
        let slot = Word256::read_from(source)?;
        Ok(Self { contract_id, slot })
    }
}
