//! Network broadcast collaborator
//!
//! Announces sealed blocks to peers. Delivery is best effort: a broadcast
//! with no listeners, or to a listener that has fallen behind, is not an
//! error.

use crate::block::Block;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default number of blocks buffered per subscriber
pub const DEFAULT_CAPACITY: usize = 64;

/// Fire-and-forget block announcement
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, block: &Block) -> Result<()>;
}

/// In-process broadcaster over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct ChannelBroadcaster {
    sender: broadcast::Sender<Arc<Block>>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every block broadcast after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Block>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl Broadcaster for ChannelBroadcaster {
    async fn broadcast(&self, block: &Block) -> Result<()> {
        match self.sender.send(Arc::new(block.clone())) {
            Ok(receivers) => debug!("Broadcast block {} to {} subscribers", block.index, receivers),
            Err(_) => trace!("No subscribers for block {}", block.index),
        }
        Ok(())
    }
}
