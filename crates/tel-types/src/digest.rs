use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// A 256-bit digest produced by the canonical hasher.
///
/// Every `entry_hash`, `previous_hash`, Merkle node and package hash is a
/// `Digest`. On the wire it is always 64 lowercase hex characters; any other
/// encoding is rejected on parse.
///
/// The all-zero digest is the genesis sentinel: the `previous_hash` of the
/// first entry in every chain scope.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Length of the hex representation.
    pub const HEX_LEN: usize = 64;

    /// Create a `Digest` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// The genesis sentinel (all zeros).
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Returns `true` if this is the genesis sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex representation (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a 64-character lowercase hex string.
    ///
    /// Uppercase digits, prefixes and wrong lengths are format violations.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        if s.len() != Self::HEX_LEN {
            return Err(TypeError::InvalidDigest(format!(
                "expected {} hex characters, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(TypeError::InvalidDigest(format!(
                "not lowercase hex: {s}"
            )));
        }
        let mut arr = [0u8; 32];
        hex::decode_to_slice(s, &mut arr).map_err(|e| TypeError::InvalidDigest(e.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Digest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<Digest> for [u8; 32] {
    fn from(digest: Digest) -> Self {
        digest.0
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_is_all_zeros() {
        let zero = Digest::zero();
        assert!(zero.is_zero());
        assert_eq!(zero.to_hex(), "0".repeat(64));
    }

    #[test]
    fn hex_is_lowercase_and_fixed_length() {
        let d = Digest::from_hash([0xAB; 32]);
        let hex = d.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, hex.to_lowercase());
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let upper = "AB".repeat(32);
        assert!(matches!(
            Digest::from_hex(&upper),
            Err(TypeError::InvalidDigest(_))
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(Digest::from_hex("abcd").is_err());
        assert!(Digest::from_hex(&"a".repeat(66)).is_err());
    }

    #[test]
    fn serializes_as_hex_string() {
        let d = Digest::from_hash([1; 32]);
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let parsed: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, d);
    }

    #[test]
    fn deserialize_rejects_bad_encoding() {
        let bad = format!("\"0x{}\"", "0".repeat(62));
        assert!(serde_json::from_str::<Digest>(&bad).is_err());
    }

    #[test]
    fn short_hex_is_8_chars() {
        assert_eq!(Digest::from_hash([7; 32]).short_hex().len(), 8);
    }

    proptest! {
        #[test]
        fn parse_accepts_own_display(bytes in proptest::array::uniform32(any::<u8>())) {
            let d = Digest::from_hash(bytes);
            prop_assert_eq!(Digest::from_hex(&d.to_string()).unwrap(), d);
        }
    }
}
