//! CPU mining worker implementation
//!
//! Multi-threaded nonce search. Lane `k` of `n` tries nonces
//! `start + k, start + k + n, start + k + 2n, …`. Lanes share only the
//! stop token and the winner slot; the hot loop polls the token (an atomic
//! read) and takes the slot's lock only after finding a hash under target.

use super::{compute_hash_rate, mining_span, MiningStats, Solution};
use crate::crypto::{HashScheme, Sha256Hasher};
use crate::difficulty::Target;
use crate::types::Digest;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Hashes counted locally before being added to the shared total
const FLUSH_INTERVAL: u64 = 4096;

/// CPU mining worker using a fixed number of threads per search
#[derive(Debug, Clone)]
pub struct CpuWorker {
    worker_count: usize,
    start_nonce: u64,
}

/// How a lane left its loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LaneExit {
    Found,
    Stopped,
    TimedOut,
    Exhausted,
}

#[derive(Debug, Clone, Copy)]
struct Claim {
    nonce: u64,
    hash: Digest,
    lane: usize,
}

/// Per-lane view of one search
struct Lane<'a> {
    index: usize,
    start: Option<u64>,
    stride: u64,
    data: &'a [u8],
    target: &'a Target,
    scheme: HashScheme,
    deadline: Instant,
    stop: &'a CancellationToken,
    claim: &'a Mutex<Option<Claim>>,
    total_hashes: &'a AtomicU64,
}

impl Lane<'_> {
    fn run(self) -> LaneExit {
        let Some(mut nonce) = self.start else {
            return LaneExit::Exhausted;
        };

        debug!("Search lane {} started at nonce {}", self.index, nonce);

        let mut hasher = Sha256Hasher::new();
        let nonce_offset = self.data.len();
        let mut buffer = Vec::with_capacity(nonce_offset + 8);
        buffer.extend_from_slice(self.data);
        buffer.extend_from_slice(&[0u8; 8]);
        let mut pending = 0u64;

        let exit = loop {
            if self.stop.is_cancelled() {
                break LaneExit::Stopped;
            }
            if Instant::now() >= self.deadline {
                break LaneExit::TimedOut;
            }

            buffer[nonce_offset..].copy_from_slice(&nonce.to_be_bytes());
            let hash = hasher.hash_with(self.scheme, &buffer);
            pending += 1;

            if self.target.is_met_by(&hash) {
                let mut slot = self.claim.lock();
                if slot.is_none() {
                    *slot = Some(Claim {
                        nonce,
                        hash,
                        lane: self.index,
                    });
                    self.stop.cancel();
                    break LaneExit::Found;
                }
                break LaneExit::Stopped;
            }

            if pending == FLUSH_INTERVAL {
                self.total_hashes.fetch_add(pending, Ordering::Relaxed);
                pending = 0;
            }

            nonce = match nonce.checked_add(self.stride) {
                Some(next) => next,
                None => break LaneExit::Exhausted,
            };
        };

        self.total_hashes.fetch_add(pending, Ordering::Relaxed);
        debug!("Search lane {} stopped: {:?}", self.index, exit);
        exit
    }
}

impl CpuWorker {
    /// Create a new CPU worker; zero means one lane per CPU
    pub fn new(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            num_cpus::get()
        } else {
            worker_count
        };

        Self {
            worker_count,
            start_nonce: 0,
        }
    }

    /// Offset every lane's first nonce
    pub fn with_start_nonce(mut self, start_nonce: u64) -> Self {
        self.start_nonce = start_nonce;
        self
    }

    /// Number of lanes per search
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Worker type name for logging
    pub fn worker_type(&self) -> &'static str {
        "cpu"
    }

    /// Search for a nonce such that `scheme(data ‖ nonce_be)` is under `target`
    ///
    /// Lanes are spawned for this call only and all of them are joined before
    /// returning. The first lane to claim the winner slot decides the nonce,
    /// so the result is not necessarily the smallest valid nonce.
    pub fn mine(
        &self,
        data: &[u8],
        target: &Target,
        scheme: HashScheme,
        deadline: Instant,
        cancellation: &CancellationToken,
    ) -> Result<Solution> {
        let span = mining_span(self.worker_type(), self.worker_count, target.difficulty_level());
        let _enter = span.enter();

        debug!(
            "Starting search over {} bytes with {} lanes",
            data.len(),
            self.worker_count
        );

        let started = Instant::now();
        let stop = cancellation.child_token();
        let claim = Mutex::new(None);
        let total_hashes = AtomicU64::new(0);
        let stride = self.worker_count as u64;

        let exits = thread::scope(|scope| -> Result<Vec<LaneExit>> {
            let mut handles = Vec::with_capacity(self.worker_count);

            for index in 0..self.worker_count {
                let lane = Lane {
                    index,
                    start: self.start_nonce.checked_add(index as u64),
                    stride,
                    data,
                    target,
                    scheme,
                    deadline,
                    stop: &stop,
                    claim: &claim,
                    total_hashes: &total_hashes,
                };

                let spawned = thread::Builder::new()
                    .name(format!("pow-lane-{}", index))
                    .spawn_scoped(scope, move || lane.run());

                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        stop.cancel();
                        return Err(Error::worker(format!("failed to spawn lane {}: {}", index, e)));
                    }
                }
            }

            let mut exits = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.join() {
                    Ok(exit) => exits.push(exit),
                    Err(_) => {
                        stop.cancel();
                        return Err(Error::worker("search lane panicked"));
                    }
                }
            }
            Ok(exits)
        })?;

        let stats = MiningStats {
            total_hashes: total_hashes.into_inner(),
            elapsed: started.elapsed(),
        };

        if let Some(claim) = claim.into_inner() {
            info!(
                "Solution found by lane {} with nonce {} after {} hashes ({:.2} MH/s)",
                claim.lane,
                claim.nonce,
                stats.total_hashes,
                compute_hash_rate(stats.total_hashes, stats.elapsed) / 1_000_000.0
            );
            return Ok(Solution {
                nonce: claim.nonce,
                hash: claim.hash,
                lane: claim.lane,
                stats,
            });
        }

        if cancellation.is_cancelled() {
            info!("Proof search cancelled");
            return Err(Error::cancelled("proof search"));
        }

        if exits.contains(&LaneExit::TimedOut) {
            warn!(
                "No proof found within {:?} ({} hashes)",
                stats.elapsed, stats.total_hashes
            );
            return Err(Error::ProofTimeout {
                elapsed: stats.elapsed,
            });
        }

        warn!("All lanes exhausted the nonce space");
        Err(Error::NonceSpaceExhausted)
    }
}

impl Default for CpuWorker {
    fn default() -> Self {
        Self::new(super::DEFAULT_WORKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{double_sha256, sha256};
    use crate::difficulty::encode_compact;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn easy_target() -> Target {
        encode_compact(8).unwrap().to_target().unwrap()
    }

    fn preimage(data: &[u8], nonce: u64) -> Vec<u8> {
        let mut bytes = data.to_vec();
        bytes.extend_from_slice(&nonce.to_be_bytes());
        bytes
    }

    #[test]
    fn test_cpu_worker_creation() {
        let worker = CpuWorker::new(2);
        assert_eq!(worker.worker_count(), 2);
        assert_eq!(worker.worker_type(), "cpu");
        assert!(CpuWorker::new(0).worker_count() >= 1);
        assert_eq!(CpuWorker::default().worker_count(), 4);
    }

    #[test]
    fn test_single_hash_solution_meets_target() {
        let worker = CpuWorker::new(4);
        let target = easy_target();
        let deadline = Instant::now() + Duration::from_secs(30);
        let solution = worker
            .mine(b"block data", &target, HashScheme::Single, deadline, &CancellationToken::new())
            .unwrap();

        let hash = sha256(&preimage(b"block data", solution.nonce));
        assert_eq!(hash, solution.hash);
        assert!(target.is_met_by(&hash));
        assert_eq!(solution.nonce % 4, solution.lane as u64);
        assert!(solution.stats.total_hashes >= 1);
    }

    #[test]
    fn test_double_hash_solution_meets_target() {
        let worker = CpuWorker::new(3);
        let target = easy_target();
        let deadline = Instant::now() + Duration::from_secs(30);
        let solution = worker
            .mine(b"proof data", &target, HashScheme::Double, deadline, &CancellationToken::new())
            .unwrap();

        assert!(target.is_met_by(&double_sha256(&preimage(b"proof data", solution.nonce))));
    }

    #[test]
    fn test_unreachable_target_times_out() {
        let worker = CpuWorker::new(2);
        let deadline = Instant::now() + Duration::from_millis(50);
        let result = worker.mine(
            b"data",
            &Target::zero(),
            HashScheme::Single,
            deadline,
            &CancellationToken::new(),
        );
        assert_matches!(result, Err(Error::ProofTimeout { .. }));
    }

    #[test]
    fn test_elapsed_deadline_times_out_immediately() {
        let worker = CpuWorker::new(2);
        let result = worker.mine(
            b"data",
            &easy_target(),
            HashScheme::Single,
            Instant::now(),
            &CancellationToken::new(),
        );
        assert_matches!(result, Err(Error::ProofTimeout { .. }));
    }

    #[test]
    fn test_cancelled_search() {
        let worker = CpuWorker::new(2);
        let cancellation = CancellationToken::new();
        cancellation.cancel();

        let result = worker.mine(
            b"data",
            &Target::zero(),
            HashScheme::Single,
            Instant::now() + Duration::from_secs(30),
            &cancellation,
        );
        assert_matches!(result, Err(Error::Cancelled { .. }));
    }

    #[test]
    fn test_nonce_overflow_is_reported() {
        let worker = CpuWorker::new(4).with_start_nonce(u64::MAX - 7);
        let result = worker.mine(
            b"data",
            &Target::zero(),
            HashScheme::Single,
            Instant::now() + Duration::from_secs(30),
            &CancellationToken::new(),
        );
        assert_matches!(result, Err(Error::NonceSpaceExhausted));
    }
}
