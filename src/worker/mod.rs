//! Proof search workers
//!
//! The nonce search: the nonce space is split across parallel lanes, each
//! lane hashes `data ‖ nonce` until one lane claims a hash under the target
//! or the deadline passes.

use crate::crypto::HashScheme;
use crate::difficulty::Target;
use crate::types::{Digest, HashRate};
use crate::Result;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Span;

pub mod cpu;

pub use cpu::CpuWorker;

/// Default number of parallel search lanes
pub const DEFAULT_WORKERS: usize = 4;

/// Mining statistics for a finished search
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total hashes computed across all lanes
    pub total_hashes: u64,
    /// Wall-clock time spent searching
    pub elapsed: Duration,
}

impl MiningStats {
    /// Average hash rate over the search
    pub fn hash_rate(&self) -> HashRate {
        HashRate::new(compute_hash_rate(self.total_hashes, self.elapsed))
    }
}

/// A winning nonce and the evidence that it meets the target
#[derive(Debug, Clone)]
pub struct Solution {
    /// Winning nonce
    pub nonce: u64,
    /// Hash of `data ‖ nonce` under the search's scheme
    pub hash: Digest,
    /// Lane that claimed the win
    pub lane: usize,
    /// Search statistics
    pub stats: MiningStats,
}

/// Search for a nonce whose double-SHA-256 hash of `data ‖ nonce` is under `target`
///
/// Spawns `worker_count` lanes and joins them all before returning. Fails
/// with [`ProofTimeout`](crate::Error::ProofTimeout) if nothing is found
/// before `deadline`.
pub fn mine(data: &[u8], target: &Target, worker_count: usize, deadline: Instant) -> Result<u64> {
    let worker = CpuWorker::new(worker_count);
    let solution = worker.mine(
        data,
        target,
        HashScheme::Double,
        deadline,
        &CancellationToken::new(),
    )?;
    Ok(solution.nonce)
}

/// Utility function to compute hash rate over a time period
pub fn compute_hash_rate(hashes: u64, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        hashes as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

/// Create a tracing span for mining operations
pub fn mining_span(worker_type: &str, workers: usize, difficulty_level: u32) -> Span {
    tracing::info_span!(
        "mining",
        worker_type = worker_type,
        workers = workers,
        difficulty = difficulty_level,
    )
}
