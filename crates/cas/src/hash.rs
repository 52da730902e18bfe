//! ContentHash: a BLAKE3 content hash truncated to 128 bits (32 hex chars).
//!
//! The hash doubles as the object key in the byte store, so anything that
//! parses as a `ContentHash` is also a safe, flat file name.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of hex characters in a content hash.
pub const HASH_HEX_LEN: usize = 32;

/// A content hash - 128 bits (16 bytes, 32 lowercase hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

/// Errors that can occur when parsing content hashes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("hash is empty")]
    Empty,

    #[error("invalid hash length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in hash")]
    InvalidHex,
}

impl ContentHash {
    /// Hash data and return the content hash.
    pub fn from_data(data: &[u8]) -> Self {
        let hash_bytes = blake3::hash(data);
        let hash_hex = hex::encode(&hash_bytes.as_bytes()[..16]); // Truncate to 16 bytes (128 bits)
        Self(hash_hex)
    }

    /// Create from an existing hash string (validates format, lowercases).
    pub fn from_str_checked(s: &str) -> Result<Self, HashError> {
        if s.is_empty() {
            return Err(HashError::Empty);
        }
        if s.len() != HASH_HEX_LEN {
            return Err(HashError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HashError::InvalidHex);
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    /// Get the full hash as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_data_produces_32_lowercase_hex_chars() {
        let hash = ContentHash::from_data(b"Hello, World!");
        assert_eq!(hash.as_str().len(), HASH_HEX_LEN);
        assert!(hash
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn test_from_data_is_deterministic() {
        let hash1 = ContentHash::from_data(b"test data");
        let hash2 = ContentHash::from_data(b"test data");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_from_data_different_input_different_hash() {
        let hash1 = ContentHash::from_data(b"data a");
        let hash2 = ContentHash::from_data(b"data b");
        assert_ne!(hash1, hash2);
    }

    #[test]
    fn test_known_digest() {
        let hash = ContentHash::from_data(b"Concurrent Data");
        assert_eq!(hash.as_str(), "5c735d76fe3537a0f35cf4a4eb14a532");
    }

    #[test]
    fn test_from_str_valid() {
        let hash_str = "abcdef01234567890123456789abcdef";
        let hash: ContentHash = hash_str.parse().unwrap();
        assert_eq!(hash.as_str(), hash_str);
    }

    #[test]
    fn test_from_str_lowercases() {
        let hash: ContentHash = "ABCDEF01234567890123456789ABCDEF".parse().unwrap();
        assert_eq!(hash.as_str(), "abcdef01234567890123456789abcdef");
    }

    #[test]
    fn test_from_str_empty() {
        let result: Result<ContentHash, _> = "".parse();
        assert_eq!(result, Err(HashError::Empty));
    }

    #[test]
    fn test_from_str_invalid_length() {
        let result: Result<ContentHash, _> = "short".parse();
        assert_eq!(result, Err(HashError::InvalidLength(5)));
    }

    #[test]
    fn test_from_str_rejects_path_like_input() {
        let result: Result<ContentHash, _> = "../../../../../../../etc/passwd".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_str_invalid_hex() {
        let result: Result<ContentHash, _> = "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse();
        assert_eq!(result, Err(HashError::InvalidHex));
    }

    #[test]
    fn test_serde_is_transparent() {
        let hash = ContentHash::from_data(b"serde test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let restored: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, restored);
    }
}
