//! Orphan block pool
//!
//! Blocks whose parent header is unknown are parked here, indexed by the
//! missing parent, until that parent connects. The pool is bounded; when it
//! is full the oldest orphan is evicted.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::Hash;
use parking_lot::Mutex;

#[derive(Default)]
struct OrphanPool {
    blocks: HashMap<Hash, Arc<Block>>,
    by_parent: HashMap<Hash, HashSet<Hash>>,
    arrival: VecDeque<Hash>,
}

impl OrphanPool {
    fn remove(&mut self, hash: &Hash) -> Option<Arc<Block>> {
        let block = self.blocks.remove(hash)?;
        let parent = block.header.hash_prev_block;
        if let Some(waiting) = self.by_parent.get_mut(&parent) {
            waiting.remove(hash);
            if waiting.is_empty() {
                self.by_parent.remove(&parent);
            }
        }
        Some(block)
    }
}

/// Dependency manager for orphan blocks
pub struct DepsManager {
    pool: Mutex<OrphanPool>,
    capacity: usize,
}

impl DepsManager {
    pub fn new(capacity: usize) -> Self {
        Self { pool: Mutex::new(OrphanPool::default()), capacity: capacity.max(1) }
    }

    /// Parks `block`; returns false when it was already parked
    pub fn add_orphan(&self, block: Arc<Block>) -> bool {
        let hash = block.hash();
        let mut pool = self.pool.lock();
        if pool.blocks.contains_key(&hash) {
            return false;
        }
        while pool.blocks.len() >= self.capacity {
            let Some(oldest) = pool.arrival.pop_front() else { break };
            if pool.remove(&oldest).is_some() {
                tracing::debug!("orphan pool full, evicted {}", oldest);
            }
        }
        pool.by_parent.entry(block.header.hash_prev_block).or_default().insert(hash);
        pool.arrival.push_back(hash);
        pool.blocks.insert(hash, block);
        true
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.pool.lock().blocks.contains_key(hash)
    }

    /// Removes and returns the orphans waiting for `parent`, in arrival order
    pub fn take_children(&self, parent: &Hash) -> Vec<Arc<Block>> {
        let mut pool = self.pool.lock();
        let Some(waiting) = pool.by_parent.remove(parent) else {
            return Vec::new();
        };
        let order: Vec<Hash> = pool.arrival.iter().filter(|hash| waiting.contains(hash)).copied().collect();
        pool.arrival.retain(|hash| !waiting.contains(hash));
        order.iter().filter_map(|hash| pool.blocks.remove(hash)).collect()
    }

    pub fn len(&self) -> usize {
        self.pool.lock().blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::header::Header;
    use consensus_core::ZERO_HASH;

    fn orphan(parent: u64, nonce: u64) -> Arc<Block> {
        Arc::new(Block::new(Header::new(Hash::from_u64_word(parent), ZERO_HASH, 10, 0x207f_ffff, nonce, 5), Vec::new()))
    }

    #[test]
    fn children_come_back_in_arrival_order() {
        let deps = DepsManager::new(8);
        let a = orphan(1, 1);
        let b = orphan(1, 2);
        let other = orphan(2, 3);
        assert!(deps.add_orphan(a.clone()));
        assert!(!deps.add_orphan(a.clone()));
        deps.add_orphan(other.clone());
        deps.add_orphan(b.clone());

        let children = deps.take_children(&Hash::from_u64_word(1));
        assert_eq!(children.iter().map(|block| block.hash()).collect::<Vec<_>>(), vec![a.hash(), b.hash()]);
        assert_eq!(deps.len(), 1);
        assert!(deps.is_orphan(&other.hash()));
        assert!(deps.take_children(&Hash::from_u64_word(1)).is_empty());
    }

    #[test]
    fn oldest_orphan_is_evicted() {
        let deps = DepsManager::new(2);
        let first = orphan(1, 1);
        deps.add_orphan(first.clone());
        deps.add_orphan(orphan(1, 2));
        deps.add_orphan(orphan(3, 3));
        assert_eq!(deps.len(), 2);
        assert!(!deps.is_orphan(&first.hash()));
        assert_eq!(deps.take_children(&Hash::from_u64_word(1)).len(), 1);
    }
}
