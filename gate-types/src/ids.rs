//! Identifier types for 0k-Gate.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// Identifier of an issued bearer token.
///
/// 16 bytes of random data, displayed as 32 lowercase hex characters.
/// Unique per owner; also the key of the global token index.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId([u8; 16]);

impl TokenId {
    /// Create a new random TokenId from the OS CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a TokenId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 16 {
            let mut arr = [0u8; 16];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Get the raw bytes of this TokenId.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for TokenId {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| TypesError::InvalidTokenId(s.to_string()))?;
        Self::from_bytes(&bytes).ok_or_else(|| TypesError::InvalidTokenId(s.to_string()))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", &self.to_string()[..8])
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_is_32_hex_chars() {
        let id = TokenId::random();
        let display = id.to_string();
        assert_eq!(display.len(), 32);
        assert!(display.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn token_id_parse_roundtrip() {
        let original = TokenId::random();
        let restored: TokenId = original.to_string().parse().unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn token_id_rejects_bad_input() {
        assert!("not-hex".parse::<TokenId>().is_err());
        assert!("abcd".parse::<TokenId>().is_err());
        assert!(TokenId::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn token_ids_differ() {
        assert_ne!(TokenId::random(), TokenId::random());
    }

    #[test]
    fn token_id_serializes_as_string() {
        let id = TokenId::from_bytes(&[0xab; 16]).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(16)));
    }
}
