//! Validity codes and token types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of DAG validation for one transaction.
///
/// Codes are stable and persisted in wallet validity tables. Non-zero codes
/// are terminal: a node never returns to `Unknown` once resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Validity {
    /// Not yet determined (or not a concern of the validator).
    Unknown = 0,
    /// Valid.
    Valid = 1,
    /// Not a token transaction, or malformed metadata.
    InvalidMalformed = 2,
    /// Inputs do not carry enough valid tokens.
    InvalidInsufficientInputs = 3,
    /// NFT child whose group parent is bad, or wrong input token type.
    InvalidBadParent = 4,
}

impl Validity {
    /// Numeric code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Valid),
            2 => Some(Self::InvalidMalformed),
            3 => Some(Self::InvalidInsufficientInputs),
            4 => Some(Self::InvalidBadParent),
            _ => None,
        }
    }

    /// True for any non-zero code.
    pub fn is_resolved(self) -> bool {
        self != Self::Unknown
    }

    /// True for the invalid codes.
    pub fn is_invalid(self) -> bool {
        self.code() > 1
    }

    /// Human-readable name, in the wording of the fungible validator.
    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Valid => "Valid",
            Self::InvalidMalformed => "Invalid: not SLP / malformed SLP",
            Self::InvalidInsufficientInputs => "Invalid: insufficient valid inputs",
            Self::InvalidBadParent => {
                "Invalid: bad parent for child NFT1 Genesis, or wrong input token type"
            }
        }
    }
}

impl Default for Validity {
    fn default() -> Self {
        Self::Unknown
    }
}

impl From<Validity> for u8 {
    fn from(v: Validity) -> u8 {
        v.code()
    }
}

impl TryFrom<u8> for Validity {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown validity code {}", code))
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Token protocol version declared in the metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Type 0x01 fungible token.
    Fungible,
    /// Type 0x41 NFT child; validity is gated on a group token.
    NftChild,
    /// Type 0x81 NFT group: a fungible token whose units mint NFT children.
    NftGroup,
}

impl TokenType {
    /// Wire value.
    pub fn code(self) -> u16 {
        match self {
            Self::Fungible => 0x01,
            Self::NftChild => 0x41,
            Self::NftGroup => 0x81,
        }
    }

    /// Parse a wire value; `None` for unsupported versions.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0x01 => Some(Self::Fungible),
            0x41 => Some(Self::NftChild),
            0x81 => Some(Self::NftGroup),
            _ => None,
        }
    }

    /// Registry class name (`SLP1`, `SLP65`, `SLP129`).
    pub fn class_name(self) -> String {
        format!("SLP{}", self.code())
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.class_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_codes() {
        for code in 0..=4u8 {
            assert_eq!(Validity::from_code(code).unwrap().code(), code);
        }
        assert!(Validity::from_code(5).is_none());
        assert!(!Validity::Unknown.is_resolved());
        assert!(!Validity::Valid.is_invalid());
        assert!(Validity::InvalidBadParent.is_invalid());
    }

    #[test]
    fn test_validity_serializes_as_code() {
        let json = serde_json::to_string(&Validity::InvalidInsufficientInputs).unwrap();
        assert_eq!(json, "3");
        let back: Validity = serde_json::from_str("1").unwrap();
        assert_eq!(back, Validity::Valid);
        assert!(serde_json::from_str::<Validity>("9").is_err());
    }

    #[test]
    fn test_token_type_classes() {
        assert_eq!(TokenType::NftGroup.class_name(), "SLP129");
        assert_eq!(TokenType::from_code(0x41), Some(TokenType::NftChild));
        assert_eq!(TokenType::from_code(0x02), None);
    }
}
