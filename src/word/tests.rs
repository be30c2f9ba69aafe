use assert_matches::assert_matches;
use proptest::prelude::*;

use super::*;

#[test]
fn word_from_u64_is_big_endian() {
    let word = Word256::from_u64(0x0102);
    let bytes = word.as_bytes();
    assert_eq!(bytes[30], 0x01);
    assert_eq!(bytes[31], 0x02);
    assert!(bytes[..30].iter().all(|&b| b == 0));
    assert_eq!(word.to_u64(), Some(0x0102));
}

#[test]
fn word_to_u64_rejects_wide_values() {
    let word = Word256::from_u128(u128::from(u64::MAX) + 1);
    assert_eq!(word.to_u64(), None);
}

#[test]
fn word_ordering_is_numeric() {
    let mut words: Vec<Word256> = [300_u64, 2, 70_000, 1].into_iter().map(Word256::from).collect();
    words.sort();
    let values: Vec<u64> = words.iter().map(|w| w.to_u64().unwrap()).collect();
    assert_eq!(values, vec![1, 2, 300, 70_000]);
}

#[test]
fn word_hex_matches_hex_crate() {
    let word = Word256::from_u128(0xdead_beef);
    assert_eq!(word.to_hex(), format!("0x{}", hex::encode(word.as_bytes())));

    let parsed = Word256::try_from(word.to_hex().as_str()).unwrap();
    assert_eq!(parsed, word);
}

#[test]
fn word_rejects_malformed_input() {
    assert_matches!(
        Word256::try_from(&[0u8; 31][..]),
        Err(WordError::InvalidLength { expected: 32, actual: 31 })
    );
    assert_matches!(Word256::try_from("0x1234"), Err(WordError::HexParse(_)));
}

#[test]
fn word_deserialization_is_length_checked() {
    let word = Word256::from_u64(7);
    let mut bytes = word.to_bytes();
    assert_eq!(bytes.len(), Word256::SERIALIZED_SIZE);

    bytes.push(0);
    assert!(Word256::read_from_bytes(&bytes).is_err());

    bytes.truncate(Word256::SERIALIZED_SIZE - 1);
    assert!(Word256::read_from_bytes(&bytes).is_err());
}

proptest! {
    #[test]
    fn word_serialization_is_the_raw_bytes(bytes in any::<[u8; 32]>()) {
        let word = Word256::new(bytes);
        prop_assert_eq!(word.to_bytes(), bytes.to_vec());
        prop_assert_eq!(Word256::read_from_bytes(&bytes).unwrap(), word);
    }
}
