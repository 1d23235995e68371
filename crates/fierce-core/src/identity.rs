// crates/fierce-core/src/identity.rs

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque identifier of a ledger participant (user, vault, funder).
///
/// The ledger never interprets the bytes. Hosts map their own account
/// addresses onto principals; tests and the simulator derive them from
/// human-readable labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Principal(pub [u8; 32]);

/// Identifier of a token collaborator. Tokens live in the same namespace as
/// principals, the way contract addresses do.
pub type TokenId = Principal;

impl Principal {
    /// The all-zero principal. Never a valid participant.
    pub const ZERO: Principal = Principal([0u8; 32]);

    /// Derive a principal from a label: SHA-256 of the UTF-8 bytes.
    pub fn from_label(label: &str) -> Self {
        let digest = Sha256::digest(label.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Principal(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Full lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Principal {
    /// Shortened `0x1234abcd` form for logs and tables.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_label_is_deterministic() {
        assert_eq!(Principal::from_label("alice"), Principal::from_label("alice"));
        assert_ne!(Principal::from_label("alice"), Principal::from_label("bob"));
    }

    #[test]
    fn test_zero() {
        assert!(Principal::ZERO.is_zero());
        assert!(!Principal::from_label("alice").is_zero());
    }

    #[test]
    fn test_display_is_short_hex() {
        let p = Principal([0xab; 32]);
        assert_eq!(format!("{}", p), "0xabababab");
        assert_eq!(p.to_hex().len(), 64);
    }
}
