//! Hex encodings of integers and byte strings.
//!
//! Integers are written big-endian as `0x`-prefixed hex. [`encode_integer`]
//! zero-pads to a caller-chosen byte width (e.g. 256 bytes for a 2048-bit
//! modulus); the artifact bundle uses that so every published value has a
//! predictable length. The [`hex_integer`] serde helper has no width to pad
//! to and writes the shortest form.
use rug::integer::Order;
use rug::Integer;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty hex string")]
    Empty,
    #[error("invalid hex string {0:?}")]
    InvalidHex(String),
    #[error("value needs {actual} bytes, more than the expected {expected}")]
    TooWide { expected: usize, actual: usize },
    #[error("expected {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("invalid Merkle proof side {0}; expected 0 or 1")]
    InvalidSide(u8),
    #[error("Merkle proof has {sides} sides but {hashes} hashes")]
    LengthMismatch { sides: usize, hashes: usize },
}

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// Hex-encode raw bytes with a `0x` prefix.
pub fn encode_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Decode `0x` hex bytes. Unlike integers, an empty string is valid.
pub fn decode_bytes(s: &str) -> Result<Vec<u8>, DecodeError> {
    let digits = strip_prefix(s.trim());
    hex::decode(digits).map_err(|_| DecodeError::InvalidHex(s.to_string()))
}

/// Encode a non-negative integer as big-endian hex, left-padded to `width`
/// bytes. Values wider than `width` are written in full; `width == 0` gives
/// the shortest even-length encoding.
pub fn encode_integer(value: &Integer, width: usize) -> String {
    debug_assert!(*value >= 0u8);
    let mut bytes = value.to_digits::<u8>(Order::Msf);
    if bytes.is_empty() {
        bytes.push(0);
    }
    if bytes.len() < width {
        let mut padded = vec![0u8; width - bytes.len()];
        padded.extend_from_slice(&bytes);
        bytes = padded;
    }
    encode_bytes(&bytes)
}

/// Decode a big-endian hex integer. Odd digit counts are accepted.
pub fn decode_integer(s: &str) -> Result<Integer, DecodeError> {
    let digits = strip_prefix(s.trim());
    if digits.is_empty() {
        return Err(DecodeError::Empty);
    }
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(s.to_string()));
    }
    Integer::from_str_radix(digits, 16).map_err(|_| DecodeError::InvalidHex(s.to_string()))
}

/// Like [`decode_integer`], but rejects values that don't fit in `width` bytes.
pub fn decode_integer_width(s: &str, width: usize) -> Result<Integer, DecodeError> {
    let value = decode_integer(s)?;
    let actual = value.significant_digits::<u8>();
    if actual > width {
        return Err(DecodeError::TooWide {
            expected: width,
            actual,
        });
    }
    Ok(value)
}

/// `serde(with = ...)` helper for hex integers, unpadded.
pub mod hex_integer {
    use rug::Integer;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Integer, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode_integer(value, 0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Integer, D::Error> {
        let s = String::deserialize(d)?;
        super::decode_integer(&s).map_err(serde::de::Error::custom)
    }
}

/// `serde(with = ...)` helper for `0x` hex byte strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode_bytes(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        super::decode_bytes(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_integer_padding() {
        assert_eq!(encode_integer(&Integer::from(0x0abc), 4), "0x00000abc");
        assert_eq!(encode_integer(&Integer::from(5), 0), "0x05");
        assert_eq!(encode_integer(&Integer::new(), 0), "0x00");
        // Wider than requested: nothing is truncated.
        assert_eq!(encode_integer(&Integer::from(0x123456), 2), "0x123456");
    }

    #[test]
    fn test_decode_integer_rejects_garbage() {
        assert_eq!(decode_integer("0x"), Err(DecodeError::Empty));
        assert_eq!(decode_integer(""), Err(DecodeError::Empty));
        assert!(matches!(
            decode_integer("0x12zz"),
            Err(DecodeError::InvalidHex(_))
        ));
        assert!(matches!(decode_integer("-0x5"), Err(DecodeError::InvalidHex(_))));
        assert!(matches!(decode_integer("0x-5"), Err(DecodeError::InvalidHex(_))));
        assert_eq!(decode_integer("0xABC").unwrap(), 0xabc);

        assert_eq!(decode_bytes("0x"), Ok(vec![]));
        assert_eq!(decode_bytes("0x00ff"), Ok(vec![0, 255]));
        assert!(matches!(decode_bytes("0xf"), Err(DecodeError::InvalidHex(_))));
    }

    #[test]
    fn test_decode_integer_width() {
        assert_eq!(decode_integer_width("0x00ff", 1).unwrap(), 255);
        assert_eq!(
            decode_integer_width("0x0100", 1),
            Err(DecodeError::TooWide {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_serde_integer_is_unpadded() {
        #[derive(serde::Serialize)]
        struct Wrapper(#[serde(with = "hex_integer")] Integer);

        let json = serde_json::to_string(&Wrapper(Integer::from(0x0abc))).unwrap();
        assert_eq!(json, "\"0x0abc\"");
        assert_eq!(encode_integer(&Integer::from(0x0abc), 4), "0x00000abc");
    }

    proptest! {
        #[test]
        fn test_integer_hex(value: u128, width in 0usize..40) {
            let value = Integer::from(value);
            let encoded = encode_integer(&value, width);
            prop_assert!(encoded.len() >= 2 + 2 * width);
            prop_assert_eq!(decode_integer(&encoded).unwrap(), value);
        }
    }
}
