//! Blocks and block assembly
//!
//! A block's hash is a single SHA-256 over
//! `index (u64 BE) ‖ timestamp (i64 BE) ‖ previous hash ‖ merkle root ‖ nonce (u64 BE)`.
//! Mining and validation build this pre-image through the same function.

use crate::crypto::{sha256, HashScheme};
use crate::difficulty::{encode_compact, CompactBits};
use crate::merkle::merkle_root;
use crate::types::{Digest, Hash, MinerId};
use crate::worker::CpuWorker;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timestamp of the fixed genesis block
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000;

/// Opaque transaction payload
///
/// Signature checks happen before a transaction reaches the pool; here only
/// the content fingerprint matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "crate::utils::hex_bytes")]
    payload: Vec<u8>,
}

impl Transaction {
    /// Wrap a serialized transaction
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// SHA-256 of the payload
    pub fn fingerprint(&self) -> Digest {
        sha256(&self.payload)
    }
}

/// Merkle root over the fingerprints of `transactions`, in order
pub fn transactions_root(transactions: &[Transaction]) -> Digest {
    let leaves: Vec<Digest> = transactions.iter().map(Transaction::fingerprint).collect();
    merkle_root(&leaves)
}

/// Block hash pre-image without the trailing nonce
pub fn header_prefix(index: u64, timestamp: i64, prev_hash: &Hash, merkle_root: &Digest) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + prev_hash.len() + merkle_root.len() + 8);
    bytes.extend_from_slice(&index.to_be_bytes());
    bytes.extend_from_slice(&timestamp.to_be_bytes());
    bytes.extend_from_slice(prev_hash.as_bytes());
    bytes.extend_from_slice(merkle_root);
    bytes
}

/// A sealed block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_hash: Hash,
    pub hash: Hash,
    pub nonce: u64,
    pub miner: MinerId,
    pub size: u64,
    pub difficulty: CompactBits,
}

impl Block {
    /// The fixed first block of every chain
    ///
    /// Not mined: its hash is the plain pre-image hash with nonce 0, and its
    /// difficulty field carries the easiest encodable target.
    pub fn genesis() -> Self {
        let transactions: Vec<Transaction> = Vec::new();
        let prev_hash = Hash::genesis_sentinel();
        let prefix = header_prefix(0, GENESIS_TIMESTAMP, &prev_hash, &transactions_root(&transactions));
        let hash = hash_with_nonce(&prefix, 0);

        Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions,
            prev_hash,
            hash,
            nonce: 0,
            miner: MinerId::anonymous(),
            size: block_size(&prefix, &[]),
            difficulty: CompactBits(GENESIS_BITS),
        }
    }

    /// Merkle root recomputed from the transaction list
    pub fn merkle_root(&self) -> Digest {
        transactions_root(&self.transactions)
    }

    /// Full hash pre-image built from the block's own fields
    pub fn preimage(&self) -> Vec<u8> {
        let mut bytes = header_prefix(self.index, self.timestamp, &self.prev_hash, &self.merkle_root());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes
    }

    /// Recompute the hash from the block's own fields
    pub fn compute_hash(&self) -> Hash {
        Hash::from(sha256(&self.preimage()))
    }

    /// Whether the stored hash matches the recomputed one
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Whether the stored hash is under the target encoded in `difficulty`
    pub fn meets_target(&self) -> Result<bool> {
        let target = self.difficulty.to_target()?;
        Ok(target.is_met_by(self.hash.as_bytes()))
    }
}

/// Compact bits carried by the genesis block (exponent 0x21, mantissa 0x8000: `2^255`)
const GENESIS_BITS: u32 = 0x2100_8000;

fn hash_with_nonce(prefix: &[u8], nonce: u64) -> Hash {
    let mut bytes = prefix.to_vec();
    bytes.extend_from_slice(&nonce.to_be_bytes());
    Hash::from(sha256(&bytes))
}

fn block_size(prefix: &[u8], transactions: &[Transaction]) -> u64 {
    let payload: usize = transactions.iter().map(|tx| tx.payload().len()).sum();
    (prefix.len() + 8 + payload) as u64
}

/// Candidate block awaiting a nonce
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub index: u64,
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_hash: Hash,
    pub merkle_root: Digest,
    prefix: Vec<u8>,
}

impl BlockTemplate {
    /// Build a candidate with an explicit timestamp
    pub fn new(index: u64, transactions: Vec<Transaction>, prev_hash: Hash, timestamp: i64) -> Self {
        let merkle_root = transactions_root(&transactions);
        let prefix = header_prefix(index, timestamp, &prev_hash, &merkle_root);

        Self {
            index,
            timestamp,
            transactions,
            prev_hash,
            merkle_root,
            prefix,
        }
    }

    /// Pre-image bytes the nonce is appended to
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Full pre-image at nonce 0
    pub fn preimage(&self) -> Vec<u8> {
        let mut bytes = self.prefix.clone();
        bytes.extend_from_slice(&0u64.to_be_bytes());
        bytes
    }
}

/// Builds candidate blocks and seals them with proof of work
#[derive(Debug, Clone)]
pub struct BlockAssembler {
    worker: CpuWorker,
    miner: MinerId,
}

impl BlockAssembler {
    pub fn new(worker: CpuWorker, miner: MinerId) -> Self {
        Self { worker, miner }
    }

    pub fn miner(&self) -> &MinerId {
        &self.miner
    }

    /// Candidate on top of `prev_hash`, stamped with the current time
    pub fn new_block(&self, index: u64, transactions: Vec<Transaction>, prev_hash: Hash) -> BlockTemplate {
        BlockTemplate::new(
            index,
            transactions,
            prev_hash,
            crate::utils::current_timestamp_secs(),
        )
    }

    /// Mine the candidate at `difficulty` and return the sealed block
    ///
    /// Fails with [`Error::EmptyBatch`] before any hashing when the candidate
    /// has no transactions, and with whatever the search surfaces otherwise.
    /// The template is consumed either way.
    pub fn finalize(
        &self,
        template: BlockTemplate,
        difficulty: u32,
        deadline: Instant,
        cancellation: &CancellationToken,
    ) -> Result<Block> {
        if template.transactions.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let bits = encode_compact(difficulty)?;
        let target = bits.to_target()?;

        debug!(
            "Mining block {} with {} transactions at difficulty {} (bits {})",
            template.index,
            template.transactions.len(),
            difficulty,
            bits
        );

        let solution = self.worker.mine(
            &template.prefix,
            &target,
            HashScheme::Single,
            deadline,
            cancellation,
        )?;

        let size = block_size(&template.prefix, &template.transactions);
        let block = Block {
            index: template.index,
            timestamp: template.timestamp,
            transactions: template.transactions,
            prev_hash: template.prev_hash,
            hash: Hash::from(solution.hash),
            nonce: solution.nonce,
            miner: self.miner.clone(),
            size,
            difficulty: bits,
        };

        info!(
            "Sealed block {} {} (nonce {}, {})",
            block.index,
            block.hash,
            block.nonce,
            solution.stats.hash_rate()
        );

        Ok(block)
    }
}
