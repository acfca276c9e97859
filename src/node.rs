//! Mining node
//!
//! The outer loop around the core: draw a batch from the pool, seal it on
//! top of the chain tip, persist, append and announce. Retry policy lives
//! here. On a timeout the batch goes back to the pool and, if configured,
//! the next attempt uses a lower difficulty.

use crate::block::{Block, BlockAssembler, Transaction};
use crate::chain::{Chain, ChainValidator, LinkFault};
use crate::difficulty::{adjust_difficulty, encode_compact, MIN_DIFFICULTY};
use crate::network::Broadcaster;
use crate::pool::TransactionPool;
use crate::store::BlockStore;
use crate::utils::format_bytes;
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Knobs of the outer mining loop
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Difficulty of the first attempt
    pub difficulty: u32,
    /// Time budget of a single search
    pub mining_timeout: Duration,
    /// Pause between attempts in [`MiningNode::run`]
    pub block_interval: Duration,
    /// Expected time per block when retargeting
    pub target_block_time: Duration,
    /// Adjust difficulty after each sealed block
    pub retarget: bool,
    /// Lower difficulty by one after a timeout
    pub relax_on_timeout: bool,
    /// Synthetic transactions submitted per tick
    pub demo_transactions: usize,
    /// Stop after this many sealed blocks
    pub max_blocks: Option<u64>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            difficulty: 16,
            mining_timeout: Duration::from_secs(30),
            block_interval: Duration::from_secs(2),
            target_block_time: Duration::from_secs(10),
            retarget: false,
            relax_on_timeout: false,
            demo_transactions: 0,
            max_blocks: None,
        }
    }
}

/// Single-writer mining node
pub struct MiningNode {
    settings: NodeSettings,
    assembler: BlockAssembler,
    chain: Chain,
    pool: Arc<dyn TransactionPool>,
    store: Arc<dyn BlockStore>,
    network: Arc<dyn Broadcaster>,
    difficulty: u32,
    sealed: u64,
}

impl MiningNode {
    /// Open a node on top of whatever the store already holds
    ///
    /// An empty store is seeded with the genesis block. A non-empty one must
    /// validate from genesis.
    pub async fn open(
        settings: NodeSettings,
        assembler: BlockAssembler,
        pool: Arc<dyn TransactionPool>,
        store: Arc<dyn BlockStore>,
        network: Arc<dyn Broadcaster>,
    ) -> Result<Self> {
        let stored = store.load_all().await?;
        let chain = if stored.is_empty() {
            let chain = Chain::new();
            store.append(chain.tip()).await?;
            chain
        } else {
            Chain::from_blocks(stored, ChainValidator::new())?
        };

        info!(
            "Opened {} store at height {} (difficulty {})",
            store.store_type(),
            chain.height(),
            settings.difficulty
        );

        Ok(Self {
            difficulty: settings.difficulty,
            settings,
            assembler,
            chain,
            pool,
            store,
            network,
            sealed: 0,
        })
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Difficulty the next attempt will use
    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Blocks sealed since the node was opened
    pub fn sealed(&self) -> u64 {
        self.sealed
    }

    /// Seal one block from the current pool contents
    ///
    /// Fails with [`Error::EmptyBatch`] when the pool is empty. Any failure
    /// after the batch was drawn returns it to the pool.
    pub async fn mine_once(&mut self, cancellation: &CancellationToken) -> Result<Block> {
        let batch = self.pool.drain();
        if batch.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let tip = self.chain.tip();
        let template = self
            .assembler
            .new_block(tip.index + 1, batch.clone(), tip.hash.clone());

        let assembler = self.assembler.clone();
        let difficulty = self.difficulty;
        let deadline = Instant::now() + self.settings.mining_timeout;
        let token = cancellation.clone();
        let started = Instant::now();

        let sealed = tokio::task::spawn_blocking(move || {
            assembler.finalize(template, difficulty, deadline, &token)
        })
        .await
        .map_err(|e| Error::worker(format!("mining task failed: {}", e)))
        .and_then(|result| result);

        let committed = match sealed {
            Ok(block) => self.commit(&block).await.map(|()| block),
            Err(e) => Err(e),
        };

        let block = match committed {
            Ok(block) => block,
            Err(e) => {
                self.pool.restore(batch);
                self.after_failure(&e);
                return Err(e);
            }
        };

        if let Err(e) = self.network.broadcast(&block).await {
            warn!("Broadcast of block {} failed: {}", block.index, e);
        }

        self.sealed += 1;
        self.after_success(started.elapsed());

        info!(
            "Block {} appended ({} transactions, {}, took {:?})",
            block.index,
            block.transactions.len(),
            format_bytes(block.size),
            started.elapsed()
        );

        Ok(block)
    }

    /// Adopt a block sealed elsewhere on top of the current tip
    ///
    /// The block must follow the tip, carry a valid hash under its own target
    /// and claim a target no easier than this node's current difficulty.
    /// Pooled transactions it includes are dropped from the pool.
    pub async fn accept_block(&mut self, block: Block) -> Result<()> {
        ChainValidator::new()
            .with_work_check(true)
            .validate_next(self.chain.tip(), &block)?;

        let required = encode_compact(self.difficulty)?.to_target()?;
        if block.difficulty.to_target()? > required {
            return Err(Error::link(block.index, LinkFault::InsufficientWork));
        }

        self.commit(&block).await?;
        self.pool.prune(&block.transactions);

        info!(
            "Accepted block {} {} from {}",
            block.index, block.hash, block.miner
        );
        Ok(())
    }

    /// Persist `block`, then extend the in-memory chain
    ///
    /// The chain is only extended once the store holds the block, so a
    /// failed write leaves both at the previous tip.
    async fn commit(&mut self, block: &Block) -> Result<()> {
        self.chain.check_next(block)?;
        self.store.append(block).await?;
        self.chain.append(block.clone())
    }

    fn after_success(&mut self, took: Duration) {
        if !self.settings.retarget {
            return;
        }
        let next = adjust_difficulty(self.difficulty, took, self.settings.target_block_time);
        if next != self.difficulty {
            info!("Difficulty adjusted {} -> {}", self.difficulty, next);
            self.difficulty = next;
        }
    }

    fn after_failure(&mut self, error: &Error) {
        if matches!(error, Error::ProofTimeout { .. })
            && self.settings.relax_on_timeout
            && self.difficulty > MIN_DIFFICULTY
        {
            self.difficulty -= 1;
            warn!("Relaxing difficulty to {} after timeout", self.difficulty);
        }
    }

    /// Submit the configured number of synthetic transactions
    fn inject_demo_transactions(&self) {
        let height = self.chain.height();
        let now = crate::utils::current_timestamp_secs();
        for i in 0..self.settings.demo_transactions {
            let payload = format!("demo:{}:{}:{}", height + 1, i, now);
            if let Err(e) = self.pool.submit(Transaction::new(payload.into_bytes())) {
                warn!("Demo transaction rejected: {}", e);
            }
        }
    }

    /// Mine on every tick until cancelled or `max_blocks` is reached
    pub async fn run(&mut self, cancellation: CancellationToken) -> Result<()> {
        info!("Starting mining loop");

        let mut ticker = interval(self.settings.block_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("Mining loop cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.settings.demo_transactions > 0 {
                self.inject_demo_transactions();
            }

            match self.mine_once(&cancellation).await {
                Ok(_) => {
                    if self.settings.max_blocks.is_some_and(|max| self.sealed >= max) {
                        info!("Reached {} sealed blocks", self.sealed);
                        break;
                    }
                }
                Err(Error::EmptyBatch) => {
                    debug!("Pool empty, waiting for transactions");
                }
                Err(Error::Cancelled { .. }) => {
                    info!("Mining cancelled mid-search");
                    break;
                }
                Err(e) if e.is_retryable() => {
                    warn!("Retryable error ({}): {}", e.category(), e);
                }
                Err(e) => {
                    error!("Fatal error ({}): {}", e.category(), e);
                    return Err(e);
                }
            }
        }

        info!(
            "Mining loop stopped at height {} after sealing {} blocks",
            self.chain.height(),
            self.sealed
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ChannelBroadcaster;
    use crate::pool::MemoryPool;
    use crate::store::{JsonFileStore, MemoryStore};
    use crate::types::{Hash, MinerId};
    use crate::worker::CpuWorker;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    /// Memory store whose next append can be made to fail
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl BlockStore for FlakyStore {
        fn store_type(&self) -> &'static str {
            "flaky"
        }

        async fn append(&self, block: &Block) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.append(block).await
        }

        async fn get_by_hash(&self, hash: &Hash) -> Result<Block> {
            self.inner.get_by_hash(hash).await
        }

        async fn len(&self) -> Result<usize> {
            self.inner.len().await
        }

        async fn load_all(&self) -> Result<Vec<Block>> {
            self.inner.load_all().await
        }
    }

    fn settings() -> NodeSettings {
        NodeSettings {
            difficulty: 8,
            block_interval: Duration::from_millis(1),
            ..NodeSettings::default()
        }
    }

    fn assembler() -> BlockAssembler {
        BlockAssembler::new(CpuWorker::new(2), MinerId::new("node-test").unwrap())
    }

    async fn memory_node(settings: NodeSettings) -> (MiningNode, Arc<MemoryPool>, Arc<MemoryStore>) {
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(MemoryStore::new());
        let node = MiningNode::open(
            settings,
            assembler(),
            pool.clone(),
            store.clone(),
            Arc::new(ChannelBroadcaster::default()),
        )
        .await
        .unwrap();
        (node, pool, store)
    }

    #[tokio::test]
    async fn test_open_seeds_genesis() {
        let (node, _, store) = memory_node(settings()).await;
        assert_eq!(node.chain().height(), 0);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_mine_once_appends_persists_and_broadcasts() {
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(MemoryStore::new());
        let network = Arc::new(ChannelBroadcaster::default());
        let mut rx = network.subscribe();
        let mut node = MiningNode::open(settings(), assembler(), pool.clone(), store.clone(), network)
            .await
            .unwrap();

        pool.submit(Transaction::new(b"pay bob".to_vec())).unwrap();
        let block = node.mine_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(block.index, 1);
        assert!(pool.is_empty());
        assert!(node.chain().is_valid());
        assert_eq!(store.get_by_hash(&block.hash).await.unwrap(), block);
        assert_eq!(*rx.recv().await.unwrap(), block);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_chain_at_store_tip() {
        let pool = Arc::new(MemoryPool::new());
        let store = Arc::new(FlakyStore::default());
        let network = Arc::new(ChannelBroadcaster::default());
        let mut node = MiningNode::open(settings(), assembler(), pool.clone(), store.clone(), network.clone())
            .await
            .unwrap();

        pool.submit(Transaction::new(b"pay carol".to_vec())).unwrap();
        store.fail_next.store(true, Ordering::SeqCst);
        assert_matches!(
            node.mine_once(&CancellationToken::new()).await,
            Err(Error::Io(_))
        );
        assert_eq!(node.chain().height(), 0);
        assert_eq!(node.sealed(), 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(store.len().await.unwrap(), 1);

        let block = node.mine_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(block.index, 1);
        assert_eq!(block.prev_hash, Block::genesis().hash);

        let reopened = MiningNode::open(settings(), assembler(), Arc::new(MemoryPool::new()), store, network)
            .await
            .unwrap();
        assert_eq!(reopened.chain().height(), 1);
        assert_eq!(reopened.chain().tip(), &block);
    }

    #[tokio::test]
    async fn test_accept_block_from_peer() {
        let (mut miner, miner_pool, _) = memory_node(settings()).await;
        let (mut follower, follower_pool, follower_store) = memory_node(settings()).await;

        miner_pool.submit(Transaction::new(b"shared".to_vec())).unwrap();
        follower_pool.submit(Transaction::new(b"shared".to_vec())).unwrap();
        follower_pool.submit(Transaction::new(b"local".to_vec())).unwrap();

        let block = miner.mine_once(&CancellationToken::new()).await.unwrap();
        follower.accept_block(block.clone()).await.unwrap();

        assert_eq!(follower.chain().height(), 1);
        assert_eq!(follower.chain().tip(), &block);
        assert_eq!(follower_store.get_by_hash(&block.hash).await.unwrap(), block);
        assert_eq!(
            follower_pool.drain(),
            vec![Transaction::new(b"local".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_accept_block_rejects_foreign_parent() {
        let (mut miner, miner_pool, _) = memory_node(settings()).await;
        let (mut follower, _, follower_store) = memory_node(settings()).await;

        miner_pool.submit(Transaction::new(b"tx".to_vec())).unwrap();
        let mut block = miner.mine_once(&CancellationToken::new()).await.unwrap();
        block.prev_hash = Hash(vec![0xee; 32]);
        block.hash = block.compute_hash();

        assert_matches!(
            follower.accept_block(block.clone()).await,
            Err(Error::ChainLinkBroken {
                index: 1,
                fault: LinkFault::PrevHashMismatch
            })
        );
        assert_eq!(follower.chain().height(), 0);
        assert_eq!(follower_store.len().await.unwrap(), 1);
        assert_matches!(
            follower_store.get_by_hash(&block.hash).await,
            Err(Error::BlockNotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_accept_block_rejects_easier_target() {
        let (mut miner, miner_pool, _) = memory_node(NodeSettings {
            difficulty: 4,
            ..settings()
        })
        .await;
        let (mut follower, _, _) = memory_node(NodeSettings {
            difficulty: 12,
            ..settings()
        })
        .await;

        miner_pool.submit(Transaction::new(b"cheap".to_vec())).unwrap();
        let block = miner.mine_once(&CancellationToken::new()).await.unwrap();

        assert_matches!(
            follower.accept_block(block).await,
            Err(Error::ChainLinkBroken {
                index: 1,
                fault: LinkFault::InsufficientWork
            })
        );
        assert_eq!(follower.chain().height(), 0);
    }

    #[tokio::test]
    async fn test_empty_pool_is_empty_batch() {
        let (mut node, _, _) = memory_node(settings()).await;
        assert_matches!(
            node.mine_once(&CancellationToken::new()).await,
            Err(Error::EmptyBatch)
        );
    }

    #[tokio::test]
    async fn test_timeout_restores_batch_and_relaxes() {
        let (mut node, pool, _) = memory_node(NodeSettings {
            difficulty: 250,
            mining_timeout: Duration::from_millis(20),
            relax_on_timeout: true,
            ..settings()
        })
        .await;

        pool.submit(Transaction::new(b"stuck".to_vec())).unwrap();
        assert_matches!(
            node.mine_once(&CancellationToken::new()).await,
            Err(Error::ProofTimeout { .. })
        );
        assert_eq!(pool.len(), 1);
        assert_eq!(node.difficulty(), 249);
        assert_eq!(node.chain().height(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_at_max_blocks() {
        let (mut node, _, store) = memory_node(NodeSettings {
            demo_transactions: 2,
            max_blocks: Some(3),
            ..settings()
        })
        .await;

        node.run(CancellationToken::new()).await.unwrap();
        assert_eq!(node.sealed(), 3);
        assert_eq!(node.chain().height(), 3);
        assert_eq!(store.len().await.unwrap(), 4);
        assert!(node.chain().is_valid());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (mut node, _, _) = memory_node(settings()).await;
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        node.run(cancellation).await.unwrap();
        assert_eq!(node.sealed(), 0);
    }

    #[tokio::test]
    async fn test_reopen_resumes_from_json_store() {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(MemoryPool::new());
        let network = Arc::new(ChannelBroadcaster::default());

        {
            let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
            let mut node = MiningNode::open(settings(), assembler(), pool.clone(), store, network.clone())
                .await
                .unwrap();
            pool.submit(Transaction::new(b"persisted".to_vec())).unwrap();
            node.mine_once(&CancellationToken::new()).await.unwrap();
        }

        let store = Arc::new(JsonFileStore::open(dir.path()).await.unwrap());
        let node = MiningNode::open(settings(), assembler(), pool, store, network)
            .await
            .unwrap();
        assert_eq!(node.chain().height(), 1);
    }
}
