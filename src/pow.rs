//! Standalone proof-of-work object
//!
//! A proof commits to arbitrary data, a timestamp and a difficulty. Its hash
//! is double SHA-256 over `data ‖ timestamp ‖ bits ‖ nonce` (all integers
//! big-endian); this is deliberately separate from the single-pass block hash.
//!
//! Serialized form: `timestamp (8) ‖ nonce (8) ‖ bits (4) ‖ data`.

use crate::crypto::{double_sha256, HashScheme};
use crate::difficulty::{encode_compact, CompactBits};
use crate::types::Digest;
use crate::worker::CpuWorker;
use crate::{Error, Result};
use byteorder::{BigEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Size of the fixed serialized header
pub const HEADER_SIZE: usize = 20;

/// Difficulty used by [`ProofOfWork::with_default_difficulty`]
pub const DEFAULT_TARGET_BITS: u32 = 24;

/// Search context and, once mined, evidence of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOfWork {
    data: Vec<u8>,
    timestamp: i64,
    nonce: u64,
    bits: CompactBits,
}

/// Summary of a mined proof
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofMetadata {
    pub hash: String,
    pub bits: CompactBits,
    pub timestamp: i64,
    pub nonce: u64,
    #[serde(with = "crate::utils::duration_millis")]
    pub duration: Duration,
}

impl ProofOfWork {
    /// Create a proof for `data` at the given linear difficulty, stamped now
    pub fn new(data: Vec<u8>, difficulty: u32) -> Result<Self> {
        Ok(Self::from_parts(
            data,
            crate::utils::current_timestamp_secs(),
            0,
            encode_compact(difficulty)?,
        ))
    }

    /// Create a proof with the default difficulty
    pub fn with_default_difficulty(data: Vec<u8>) -> Result<Self> {
        Self::new(data, DEFAULT_TARGET_BITS)
    }

    /// Assemble a proof from its raw fields
    pub fn from_parts(data: Vec<u8>, timestamp: i64, nonce: u64, bits: CompactBits) -> Self {
        Self {
            data,
            timestamp,
            nonce,
            bits,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn bits(&self) -> CompactBits {
        self.bits
    }

    /// Hash pre-image without the trailing nonce
    fn prefix(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data.len() + 12);
        bytes.extend_from_slice(&self.data);
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.bits.value().to_be_bytes());
        bytes
    }

    /// Double SHA-256 of the full pre-image
    pub fn hash(&self) -> Digest {
        let mut bytes = self.prefix();
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        double_sha256(&bytes)
    }

    /// Whether the current nonce meets the encoded target
    pub fn validate(&self) -> Result<bool> {
        let target = self.bits.to_target()?;
        Ok(target.is_met_by(&self.hash()))
    }

    /// Search for a nonce and record it
    ///
    /// The nonce is the only field this touches; on failure it is left as it
    /// was.
    pub fn mine(
        &mut self,
        worker: &CpuWorker,
        deadline: Instant,
        cancellation: &CancellationToken,
    ) -> Result<ProofMetadata> {
        let started = Instant::now();
        let target = self.bits.to_target()?;
        let solution = worker.mine(
            &self.prefix(),
            &target,
            HashScheme::Double,
            deadline,
            cancellation,
        )?;

        self.nonce = solution.nonce;
        debug!("Proof sealed with nonce {}", self.nonce);
        Ok(self.metadata(started))
    }

    /// Metadata for a proof whose search began at `started`
    pub fn metadata(&self, started: Instant) -> ProofMetadata {
        ProofMetadata {
            hash: hex::encode(self.hash()),
            bits: self.bits,
            timestamp: self.timestamp,
            nonce: self.nonce,
            duration: started.elapsed(),
        }
    }

    /// Encode to the wire form
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.data.len());
        bytes.extend_from_slice(&self.timestamp.to_be_bytes());
        bytes.extend_from_slice(&self.nonce.to_be_bytes());
        bytes.extend_from_slice(&self.bits.value().to_be_bytes());
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Decode from the wire form
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::malformed(format!(
                "proof needs at least {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(&bytes[..HEADER_SIZE]);
        let timestamp = cursor.read_i64::<BigEndian>()?;
        let nonce = cursor.read_u64::<BigEndian>()?;
        let bits = CompactBits(cursor.read_u32::<BigEndian>()?);

        Ok(Self::from_parts(
            bytes[HEADER_SIZE..].to_vec(),
            timestamp,
            nonce,
            bits,
        ))
    }
}
