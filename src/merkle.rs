//! Merkle commitment over transaction fingerprints
//!
//! Leaves are the fingerprints themselves (already SHA-256 of each payload),
//! taken as-is. Each internal node is `SHA-256(left ‖ right)`. A level with an
//! odd count duplicates its last node before pairing.
//!
//! The tree is kept as one level at a time: each level is a plain vector that
//! is dropped once the next one has been computed, so only the root survives.

use crate::crypto::{sha256, Sha256Hasher};
use crate::types::Digest;

/// Root committed by an empty list: the hash of an empty byte string
pub fn empty_root() -> Digest {
    sha256(&[])
}

/// Compute the Merkle root of an ordered list of leaf digests
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    match leaves {
        [] => empty_root(),
        [single] => *single,
        _ => {
            let mut hasher = Sha256Hasher::new();
            let mut level = leaves.to_vec();
            while level.len() > 1 {
                level = next_level(&mut hasher, &level);
            }
            level[0]
        }
    }
}

fn next_level(hasher: &mut Sha256Hasher, level: &[Digest]) -> Vec<Digest> {
    let mut parents = Vec::with_capacity((level.len() + 1) / 2);
    let mut combined = [0u8; 64];

    for pair in level.chunks(2) {
        let left = &pair[0];
        let right = pair.get(1).unwrap_or(left);
        combined[..32].copy_from_slice(left);
        combined[32..].copy_from_slice(right);
        parents.push(hasher.hash(&combined));
    }

    parents
}
