//! Transaction pool collaborator
//!
//! Supplies already-validated transactions in arrival order. Drawing a batch
//! empties the pool in one step. A fingerprint can be pooled only once.

use crate::block::Transaction;
use crate::types::Digest;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Source of transaction batches for block assembly
pub trait TransactionPool: Send + Sync {
    /// Queue a transaction behind everything already pooled
    ///
    /// Fails with [`Error::DuplicateTransaction`] when a transaction with the
    /// same fingerprint is already pending.
    fn submit(&self, transaction: Transaction) -> Result<()>;

    /// Take every pooled transaction, leaving the pool empty
    fn drain(&self) -> Vec<Transaction>;

    /// Put a previously drawn batch back in front of anything submitted since
    fn restore(&self, batch: Vec<Transaction>);

    /// Drop pending transactions that a block already includes
    fn prune(&self, included: &[Transaction]);

    /// Number of pooled transactions
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Default)]
struct Pending {
    queue: Vec<Transaction>,
    seen: HashSet<Digest>,
}

/// In-memory pool behind a single lock
#[derive(Debug, Clone, Default)]
pub struct MemoryPool {
    pending: Arc<Mutex<Pending>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionPool for MemoryPool {
    fn submit(&self, transaction: Transaction) -> Result<()> {
        let fingerprint = transaction.fingerprint();
        let mut pending = self.pending.lock();
        if !pending.seen.insert(fingerprint) {
            return Err(Error::duplicate(hex::encode(fingerprint)));
        }
        pending.queue.push(transaction);
        Ok(())
    }

    fn drain(&self) -> Vec<Transaction> {
        let mut pending = self.pending.lock();
        pending.seen.clear();
        let batch = std::mem::take(&mut pending.queue);
        debug!("Drained {} transactions from pool", batch.len());
        batch
    }

    fn restore(&self, batch: Vec<Transaction>) {
        if batch.is_empty() {
            return;
        }
        let mut pending = self.pending.lock();
        debug!("Restoring {} transactions to pool", batch.len());

        // Resubmitted copies of restored transactions keep their restored slot
        let restored: HashSet<Digest> = batch.iter().map(Transaction::fingerprint).collect();
        let later = std::mem::take(&mut pending.queue);
        let mut queue = Vec::with_capacity(batch.len() + later.len());
        let mut seen = HashSet::with_capacity(batch.len() + later.len());
        for tx in batch {
            if seen.insert(tx.fingerprint()) {
                queue.push(tx);
            }
        }
        for tx in later {
            let fingerprint = tx.fingerprint();
            if !restored.contains(&fingerprint) && seen.insert(fingerprint) {
                queue.push(tx);
            }
        }
        pending.queue = queue;
        pending.seen = seen;
    }

    fn prune(&self, included: &[Transaction]) {
        let included: HashSet<Digest> = included.iter().map(Transaction::fingerprint).collect();
        let mut pending = self.pending.lock();
        let before = pending.queue.len();
        pending.queue.retain(|tx| !included.contains(&tx.fingerprint()));
        pending.seen.retain(|fingerprint| !included.contains(fingerprint));
        let removed = before - pending.queue.len();
        if removed > 0 {
            debug!("Pruned {} transactions already in a block", removed);
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().queue.len()
    }
}
