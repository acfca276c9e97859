//! Cryptographic utilities for mining
//!
//! SHA-256 hashing with a reusable hasher for the nonce search loop.
//!
//! Two hash contracts coexist and are never mixed:
//! - block hashes (sealing and chain validation) use a single SHA-256 pass;
//! - the standalone [`ProofOfWork`](crate::pow::ProofOfWork) object uses
//!   double SHA-256.

use crate::types::Digest;
use sha2::{Digest as _, Sha256};

/// Which hash construction a search or verification uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// `H(data)`, used for block hashes
    Single,
    /// `H(H(data))`, used for standalone proofs
    Double,
}

/// Reusable SHA-256 hasher for mining operations
pub struct Sha256Hasher {
    hasher: Sha256,
}

impl Sha256Hasher {
    /// Create a new SHA-256 hasher
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    /// Hash data and return the result
    pub fn hash(&mut self, data: &[u8]) -> Digest {
        self.hasher.update(data);
        self.hasher.finalize_reset().into()
    }

    /// Hash the data twice
    pub fn double_hash(&mut self, data: &[u8]) -> Digest {
        let first = self.hash(data);
        self.hash(&first)
    }

    /// Hash with the given scheme
    pub fn hash_with(&mut self, scheme: HashScheme, data: &[u8]) -> Digest {
        match scheme {
            HashScheme::Single => self.hash(data),
            HashScheme::Double => self.double_hash(data),
        }
    }
}

impl Default for Sha256Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot SHA-256
pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

/// One-shot double SHA-256
pub fn double_sha256(data: &[u8]) -> Digest {
    sha256(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hasher_reuse_is_deterministic() {
        let mut hasher = Sha256Hasher::new();
        let first = hasher.hash(b"test data");
        let second = hasher.hash(b"test data");
        assert_eq!(first, second);
        assert_ne!(first, hasher.hash(b"different data"));
    }

    #[test]
    fn test_double_hash_matches_one_shot() {
        let mut hasher = Sha256Hasher::new();
        assert_eq!(hasher.double_hash(b"abc"), double_sha256(b"abc"));
        assert_eq!(hasher.hash_with(HashScheme::Double, b"abc"), double_sha256(b"abc"));
        assert_eq!(hasher.hash_with(HashScheme::Single, b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), double_sha256(b"abc"));
    }
}
