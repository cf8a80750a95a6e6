// Every byte form that is persisted or hashed goes through this layer.
// The configuration is pinned to big-endian with fixed-width integers so
// that two nodes produce identical bytes for the same logical value.
use crate::error::{ChainError, Result};
use bincode::config::{BigEndian, Configuration, Fixint};
use serde::{Deserialize, Serialize};

fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// Serialize to the canonical wire form: length-prefixed, big-endian,
/// fixed-width integers.
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, wire_config())
        .map_err(|e| ChainError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize from the canonical wire form.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let (data, _) = bincode::decode_from_slice(bytes, wire_config())
        .map_err(|e| ChainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct WireProbe {
        id: Vec<u8>,
        index: i32,
        amount: i64,
    }

    #[test]
    fn test_round_trip() {
        let original = WireProbe {
            id: vec![7; 32],
            index: -1,
            amount: 1_000_000_000,
        };

        let bytes = serialize(&original).expect("serialization should work");
        let decoded: WireProbe = deserialize(&bytes).expect("deserialization should work");

        assert_eq!(original, decoded);
    }

    #[test]
    fn test_wire_form_is_big_endian() {
        // A bare i64 encodes as exactly its eight big-endian bytes.
        let value: i64 = 0x0102_0304_0506_0708;
        let bytes = serialize(&value).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid = vec![0xFF, 0xFF];
        let result: Result<WireProbe> = deserialize(&invalid);
        assert!(result.is_err());
    }
}
