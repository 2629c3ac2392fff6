//! Transaction and token identifiers.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Error returned when parsing a hex id.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdParseError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

/// 32-byte transaction id, in display (big-endian hex) byte order.
///
/// Implements `Ord` so that graph iteration over ids is deterministic.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId([u8; 32]);

/// A token id is the txid of the token's GENESIS transaction.
pub type TokenId = TxId;

impl TxId {
    /// Wrap raw bytes.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Build from a byte slice, which must be exactly 32 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdParseError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdParseError::Length(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Parse from a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }

    /// Bytes in display order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First `n` hex characters, used for synthetic token names and log lines.
    pub fn short(&self, n: usize) -> String {
        let mut s = self.to_hex();
        s.truncate(n.min(64));
        s
    }

    /// Deterministic id built from an integer (fixtures, benches).
    pub fn from_u128(n: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&n.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({:.10}..)", self.to_hex())
    }
}

impl FromStr for TxId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TxId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Reference to one output of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Funding transaction.
    pub txid: TxId,
    /// Output index within the funding transaction.
    pub vout: u32,
}

impl OutPoint {
    /// Create an outpoint.
    pub fn new(txid: TxId, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let id = TxId::from_u128(0xabcdef);
        let parsed: TxId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);

        assert!(matches!(TxId::from_hex("abcd"), Err(IdParseError::Length(2))));
        assert!(matches!(TxId::from_hex("zz"), Err(IdParseError::Hex(_))));
    }

    #[test]
    fn test_serde_as_hex_string() {
        let id = TxId::from_u128(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: TxId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_short() {
        let id = TxId::from_hex(&"ab".repeat(32)).unwrap();
        assert_eq!(id.short(5), "ababa");
    }
}
