//! Chain event notifications
//!
//! Events go out over a `tokio` broadcast channel. Sending never blocks, so
//! a slow subscriber only ever loses events (it sees `Lagged`), it can never
//! stall the chain mutation section.

use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::Hash;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockConnected { correlation_id: Uuid, block: Arc<Block>, hash: Hash, height: u64, new_tip: Hash },
    BlockDisconnected { correlation_id: Uuid, block: Arc<Block>, hash: Hash, height: u64, new_tip: Hash },
}

impl ChainEvent {
    pub fn connected(block: Arc<Block>, height: u64) -> Self {
        let hash = block.hash();
        ChainEvent::BlockConnected { correlation_id: Uuid::new_v4(), block, hash, height, new_tip: hash }
    }

    pub fn disconnected(block: Arc<Block>, height: u64) -> Self {
        let hash = block.hash();
        let new_tip = block.header.hash_prev_block;
        ChainEvent::BlockDisconnected { correlation_id: Uuid::new_v4(), block, hash, height, new_tip }
    }

    pub fn correlation_id(&self) -> Uuid {
        match self {
            ChainEvent::BlockConnected { correlation_id, .. } | ChainEvent::BlockDisconnected { correlation_id, .. } => *correlation_id,
        }
    }

    pub fn hash(&self) -> Hash {
        match self {
            ChainEvent::BlockConnected { hash, .. } | ChainEvent::BlockDisconnected { hash, .. } => *hash,
        }
    }

    pub fn new_tip(&self) -> Hash {
        match self {
            ChainEvent::BlockConnected { new_tip, .. } | ChainEvent::BlockDisconnected { new_tip, .. } => *new_tip,
        }
    }

    pub fn block(&self) -> &Arc<Block> {
        match self {
            ChainEvent::BlockConnected { block, .. } | ChainEvent::BlockDisconnected { block, .. } => block,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.sender.subscribe()
    }

    /// Best-effort delivery; returns the number of subscribers reached
    pub fn publish(&self, event: ChainEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::header::Header;
    use consensus_core::ZERO_HASH;

    fn block() -> Arc<Block> {
        Arc::new(Block::new(Header::new(Hash::from_u64_word(1), ZERO_HASH, 10, 0x207f_ffff, 0, 1), Vec::new()))
    }

    #[test]
    fn publishing_without_subscribers_does_not_fail() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(ChainEvent::connected(block(), 1)), 0);
    }

    #[tokio::test]
    async fn subscribers_receive_tagged_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let connected = ChainEvent::connected(block(), 1);
        let disconnected = ChainEvent::disconnected(block(), 1);
        assert_ne!(connected.correlation_id(), disconnected.correlation_id());

        bus.publish(connected.clone());
        bus.publish(disconnected);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.correlation_id(), connected.correlation_id());
        assert_eq!(first.new_tip(), first.hash());
        let second = rx.recv().await.unwrap();
        assert_eq!(second.new_tip(), Hash::from_u64_word(1));
    }
}
