//! Header tree
//!
//! Arena of every accepted header, indexed by hash, with a secondary index
//! from parent hash to children for discovering competing branches. Nodes
//! only refer to their parent by hash, the tree owns all of them.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use consensus_core::errors::{ConsensusError, ConsensusResult};
use consensus_core::header::Header;
use consensus_core::{ChainWork, Hash};
use consensus_pow::calc_work;

/// A header placed in the tree together with its chain context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedHeader {
    pub hash: Hash,
    pub header: Header,
    pub height: u64,
    /// Cumulative work from genesis up to and including this header
    pub chain_work: ChainWork,
    /// Arrival order within the tree
    pub seq: u64,
}

impl ChainedHeader {
    pub fn parent_hash(&self) -> Hash {
        self.header.hash_prev_block
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Greatest work first, earliest arrival on ties
    fn selection_key(&self) -> (ChainWork, Reverse<u64>) {
        (self.chain_work, Reverse(self.seq))
    }
}

/// Validation progress of a block known to the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Header validated, body not seen yet
    HeaderOnly,
    /// Body passed the context-free and partial stages
    BodyStored,
    /// Passed full validation at least once; its changeset is known
    FullyValidated,
    /// Failed validation
    Invalid { ban: bool },
    /// Descends from an invalid block
    InvalidAncestor,
}

impl BlockStatus {
    pub fn is_invalid(&self) -> bool {
        matches!(self, BlockStatus::Invalid { .. } | BlockStatus::InvalidAncestor)
    }

    pub fn has_body(&self) -> bool {
        matches!(self, BlockStatus::BodyStored | BlockStatus::FullyValidated)
    }
}

/// Upper bound on remembered rejected headers
const MAX_REJECTED: usize = 10_000;

pub struct HeaderTree {
    nodes: HashMap<Hash, Arc<ChainedHeader>>,
    children: HashMap<Hash, HashSet<Hash>>,
    status: HashMap<Hash, BlockStatus>,
    active: HashSet<Hash>,
    /// Bodied blocks whose ancestry is bodied all the way down to the active chain
    connectable: HashSet<Hash>,
    /// Headers that failed header validation and never entered the tree, with
    /// the height they would have had
    rejected: HashMap<Hash, u64>,
    genesis: Arc<ChainedHeader>,
    best: Arc<ChainedHeader>,
    next_seq: u64,
}

impl HeaderTree {
    pub fn new(genesis: Header) -> Self {
        let hash = genesis.hash();
        let node = Arc::new(ChainedHeader { hash, height: genesis.height, chain_work: calc_work(genesis.bits), header: genesis, seq: 0 });
        Self {
            nodes: HashMap::from([(hash, node.clone())]),
            children: HashMap::new(),
            status: HashMap::from([(hash, BlockStatus::FullyValidated)]),
            active: HashSet::from([hash]),
            connectable: HashSet::from([hash]),
            rejected: HashMap::new(),
            genesis: node.clone(),
            best: node,
            next_seq: 1,
        }
    }

    /// Inserts `header` below its parent and returns the new node.
    /// The best tip only moves on strictly greater work.
    pub fn connect(&mut self, header: Header) -> ConsensusResult<Arc<ChainedHeader>> {
        let hash = header.hash();
        if self.nodes.contains_key(&hash) {
            return Err(ConsensusError::Duplicate(hash));
        }

        let parent_hash = header.hash_prev_block;
        let parent = self.nodes.get(&parent_hash).cloned().ok_or(ConsensusError::OrphanHeader { hash, parent: parent_hash })?;
        if self.is_invalid(&parent_hash) {
            return Err(ConsensusError::InvalidParent { hash, reason: format!("parent {parent_hash} is invalid") });
        }
        if header.height != parent.height + 1 {
            return Err(ConsensusError::InvalidParent {
                hash,
                reason: format!("height {} does not follow parent height {}", header.height, parent.height),
            });
        }

        let node = Arc::new(ChainedHeader {
            hash,
            height: header.height,
            chain_work: parent.chain_work.saturating_add(calc_work(header.bits)),
            header,
            seq: self.next_seq,
        });
        self.next_seq += 1;

        self.children.entry(parent_hash).or_default().insert(hash);
        self.status.insert(hash, BlockStatus::HeaderOnly);
        self.nodes.insert(hash, node.clone());

        if node.chain_work > self.best.chain_work {
            self.best = node.clone();
        }
        tracing::trace!("header {} connected at height {}", hash, node.height);
        Ok(node)
    }

    /// Node with the most cumulative work among valid nodes, first seen on ties
    pub fn best_tip(&self) -> Arc<ChainedHeader> {
        self.best.clone()
    }

    pub fn genesis(&self) -> Arc<ChainedHeader> {
        self.genesis.clone()
    }

    pub fn get(&self, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        self.nodes.get(hash).cloned()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node, lowest height first
    pub fn nodes_by_height(&self) -> Vec<Arc<ChainedHeader>> {
        let mut nodes: Vec<_> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|node| (node.height, node.seq));
        nodes
    }

    pub fn children(&self, hash: &Hash) -> Vec<Hash> {
        self.children.get(hash).map(|set| set.iter().copied().collect()).unwrap_or_default()
    }

    pub fn status(&self, hash: &Hash) -> Option<BlockStatus> {
        self.status.get(hash).copied()
    }

    pub fn is_invalid(&self, hash: &Hash) -> bool {
        self.status.get(hash).is_some_and(BlockStatus::is_invalid)
    }

    pub fn set_fully_validated(&mut self, hash: &Hash) {
        if let Some(status) = self.status.get_mut(hash) {
            if !status.is_invalid() {
                *status = BlockStatus::FullyValidated;
            }
        }
    }

    /// Records that the body of `hash` passed the pre-connection stages and
    /// extends the connectable set through any bodied descendants.
    pub fn set_body_stored(&mut self, hash: &Hash) {
        if self.status.get(hash) != Some(&BlockStatus::HeaderOnly) {
            return;
        }
        self.status.insert(*hash, BlockStatus::BodyStored);
        let Some(node) = self.nodes.get(hash) else { return };
        if !self.connectable.contains(&node.parent_hash()) {
            return;
        }

        let mut stack = vec![*hash];
        while let Some(current) = stack.pop() {
            if !self.connectable.insert(current) {
                continue;
            }
            for child in self.children.get(&current).into_iter().flatten() {
                if self.status.get(child).is_some_and(BlockStatus::has_body) {
                    stack.push(*child);
                }
            }
        }
    }

    /// Connectable block with the most work, first seen on ties
    pub fn best_connectable(&self) -> Option<Arc<ChainedHeader>> {
        self.connectable
            .iter()
            .filter(|hash| !self.is_invalid(hash))
            .filter_map(|hash| self.nodes.get(hash))
            .max_by_key(|node| node.selection_key())
            .cloned()
    }

    pub fn is_connectable(&self, hash: &Hash) -> bool {
        self.connectable.contains(hash)
    }

    pub fn set_active(&mut self, hash: &Hash, active: bool) {
        if active {
            self.active.insert(*hash);
            self.connectable.insert(*hash);
        } else {
            self.active.remove(hash);
        }
    }

    pub fn is_active(&self, hash: &Hash) -> bool {
        self.active.contains(hash)
    }

    /// Marks `hash` invalid and every descendant as invalid-ancestor.
    /// Returns the affected hashes, `hash` first.
    pub fn mark_invalid(&mut self, hash: &Hash, ban: bool) -> Vec<Hash> {
        if !self.nodes.contains_key(hash) || *hash == self.genesis.hash {
            return Vec::new();
        }
        self.status.insert(*hash, BlockStatus::Invalid { ban });
        let mut affected = vec![*hash];
        let mut stack = self.children(hash);
        while let Some(current) = stack.pop() {
            self.status.insert(current, BlockStatus::InvalidAncestor);
            affected.push(current);
            stack.extend(self.children(&current));
        }
        for h in &affected {
            self.connectable.remove(h);
        }
        if affected.contains(&self.best.hash) {
            self.recompute_best();
        }
        tracing::debug!("marked {} and {} descendants invalid", hash, affected.len() - 1);
        affected
    }

    fn recompute_best(&mut self) {
        self.best = self
            .nodes
            .values()
            .filter(|node| !self.is_invalid(&node.hash))
            .fold(self.genesis.clone(), |best, node| if node.selection_key() > best.selection_key() { node.clone() } else { best });
    }

    /// Remembers a header that failed validation on top of a parent at
    /// `height - 1`. At capacity the lowest entry is forgotten.
    pub fn record_rejected(&mut self, hash: Hash, height: u64) {
        if self.rejected.len() >= MAX_REJECTED && !self.rejected.contains_key(&hash) {
            if let Some(lowest) = self.rejected.iter().min_by_key(|(_, height)| **height).map(|(hash, _)| *hash) {
                self.rejected.remove(&lowest);
            }
        }
        self.rejected.insert(hash, height);
    }

    pub fn is_rejected(&self, hash: &Hash) -> bool {
        self.rejected.contains_key(hash)
    }

    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// Ancestor of `node` at `height`, `node` itself included
    pub fn ancestor_at(&self, node: &Arc<ChainedHeader>, height: u64) -> Option<Arc<ChainedHeader>> {
        if height > node.height {
            return None;
        }
        let mut current = node.clone();
        while current.height > height {
            current = self.nodes.get(&current.parent_hash())?.clone();
        }
        Some(current)
    }

    /// Up to `count` nodes walking back from `hash`, `hash` first
    pub fn ancestry(&self, hash: &Hash, count: usize) -> Vec<Arc<ChainedHeader>> {
        let mut result = Vec::with_capacity(count);
        let mut next = self.nodes.get(hash).cloned();
        while let Some(node) = next {
            if result.len() == count {
                break;
            }
            next = if node.hash == self.genesis.hash { None } else { self.nodes.get(&node.parent_hash()).cloned() };
            result.push(node);
        }
        result
    }

    /// Lowest common ancestor of `a` and `b`
    pub fn find_fork(&self, a: &Arc<ChainedHeader>, b: &Arc<ChainedHeader>) -> Option<Arc<ChainedHeader>> {
        let height = a.height.min(b.height);
        let mut a = self.ancestor_at(a, height)?;
        let mut b = self.ancestor_at(b, height)?;
        while a.hash != b.hash {
            a = self.nodes.get(&a.parent_hash())?.clone();
            b = self.nodes.get(&b.parent_hash())?.clone();
        }
        Some(a)
    }

    /// Nodes strictly after `ancestor` up to and including `to`, in forward order.
    /// `None` when `ancestor` is not an ancestor of `to`.
    pub fn path(&self, ancestor: &Arc<ChainedHeader>, to: &Arc<ChainedHeader>) -> Option<Vec<Arc<ChainedHeader>>> {
        let mut path = Vec::new();
        let mut current = to.clone();
        while current.height > ancestor.height {
            path.push(current.clone());
            current = self.nodes.get(&current.parent_hash())?.clone();
        }
        if current.hash != ancestor.hash {
            return None;
        }
        path.reverse();
        Some(path)
    }

    /// Drops side branches that fork off the best chain and lie entirely
    /// below `below_height`. Ancestors of the best tip and active blocks are
    /// kept. Returns the removed hashes.
    pub fn prune(&mut self, below_height: u64) -> Vec<Hash> {
        let mut best_chain = HashSet::new();
        let mut current = Some(self.best.clone());
        while let Some(node) = current {
            best_chain.insert(node.hash);
            current = if node.hash == self.genesis.hash { None } else { self.nodes.get(&node.parent_hash()).cloned() };
        }

        let roots: Vec<Hash> = self
            .nodes
            .values()
            .filter(|node| node.height < below_height && !best_chain.contains(&node.hash) && best_chain.contains(&node.parent_hash()))
            .map(|node| node.hash)
            .collect();

        let mut removed = Vec::new();
        for root in roots {
            let mut subtree = Vec::new();
            let mut stack = vec![root];
            let mut live = false;
            while let Some(hash) = stack.pop() {
                let Some(node) = self.nodes.get(&hash) else { continue };
                if node.height >= below_height || self.active.contains(&hash) {
                    live = true;
                    break;
                }
                subtree.push(hash);
                stack.extend(self.children(&hash));
            }
            if live {
                continue;
            }
            if let Some(node) = self.nodes.get(&root) {
                let parent = node.parent_hash();
                if let Some(siblings) = self.children.get_mut(&parent) {
                    siblings.remove(&root);
                }
            }
            for hash in subtree {
                self.nodes.remove(&hash);
                self.children.remove(&hash);
                self.status.remove(&hash);
                self.connectable.remove(&hash);
                removed.push(hash);
            }
        }
        self.rejected.retain(|_, height| *height >= below_height);
        if !removed.is_empty() {
            tracing::debug!("pruned {} stale headers below height {}", removed.len(), below_height);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::ZERO_HASH;

    const LOW_WORK_BITS: u32 = 0x207f_ffff;
    const MID_WORK_BITS: u32 = 0x2000_ffff;
    const HIGH_WORK_BITS: u32 = 0x1f00_ffff;

    fn genesis() -> Header {
        Header::new(ZERO_HASH, ZERO_HASH, 1_700_000_000, LOW_WORK_BITS, 0, 0)
    }

    fn child(parent: &Header, bits: u32, nonce: u64) -> Header {
        Header::new(parent.hash(), ZERO_HASH, parent.timestamp + 1, bits, nonce, parent.height + 1)
    }

    #[test]
    fn heavier_branch_becomes_best() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());

        let a = child(&g, LOW_WORK_BITS, 1);
        let b = child(&g, MID_WORK_BITS, 2);
        tree.connect(a.clone()).unwrap();
        let b_node = tree.connect(b).unwrap();
        assert_eq!(tree.best_tip().hash, b_node.hash);

        let c = tree.connect(child(&a, HIGH_WORK_BITS, 3)).unwrap();
        assert!(c.chain_work > b_node.chain_work);
        assert_eq!(tree.best_tip().hash, c.hash);
    }

    #[test]
    fn equal_work_keeps_first_seen() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let first = tree.connect(child(&g, LOW_WORK_BITS, 1)).unwrap();
        let second = tree.connect(child(&g, LOW_WORK_BITS, 2)).unwrap();
        assert_eq!(first.chain_work, second.chain_work);
        assert_eq!(tree.best_tip().hash, first.hash);

        tree.mark_invalid(&first.hash, true);
        assert_eq!(tree.best_tip().hash, second.hash);
    }

    #[test]
    fn connect_failures() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let a = child(&g, LOW_WORK_BITS, 1);
        tree.connect(a.clone()).unwrap();

        assert_eq!(tree.connect(a.clone()), Err(ConsensusError::Duplicate(a.hash())));

        let orphan = Header::new(Hash::from_u64_word(77), ZERO_HASH, 5, LOW_WORK_BITS, 0, 9);
        assert!(matches!(tree.connect(orphan), Err(ConsensusError::OrphanHeader { .. })));

        let mut wrong_height = child(&a, LOW_WORK_BITS, 1);
        wrong_height.height = 5;
        assert!(matches!(tree.connect(wrong_height), Err(ConsensusError::InvalidParent { .. })));

        tree.mark_invalid(&a.hash(), true);
        assert!(matches!(tree.connect(child(&a, LOW_WORK_BITS, 2)), Err(ConsensusError::InvalidParent { .. })));
    }

    #[test]
    fn invalidation_spreads_to_descendants() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let a = child(&g, LOW_WORK_BITS, 1);
        let b = child(&a, LOW_WORK_BITS, 1);
        tree.connect(a.clone()).unwrap();
        tree.connect(b.clone()).unwrap();

        let affected = tree.mark_invalid(&a.hash(), false);
        assert_eq!(affected, vec![a.hash(), b.hash()]);
        assert_eq!(tree.status(&b.hash()), Some(BlockStatus::InvalidAncestor));
        assert_eq!(tree.best_tip().hash, g.hash());
    }

    #[test]
    fn fork_and_paths() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let a1 = child(&g, LOW_WORK_BITS, 1);
        let a2 = child(&a1, LOW_WORK_BITS, 1);
        let b1 = child(&g, LOW_WORK_BITS, 2);
        for h in [&a1, &a2, &b1] {
            tree.connect(h.clone()).unwrap();
        }
        let a2n = tree.get(&a2.hash()).unwrap();
        let b1n = tree.get(&b1.hash()).unwrap();
        let fork = tree.find_fork(&a2n, &b1n).unwrap();
        assert_eq!(fork.hash, g.hash());

        let path: Vec<Hash> = tree.path(&fork, &a2n).unwrap().iter().map(|n| n.hash).collect();
        assert_eq!(path, vec![a1.hash(), a2.hash()]);
        assert!(tree.path(&b1n, &a2n).is_none());

        let ancestry: Vec<u64> = tree.ancestry(&a2.hash(), 10).iter().map(|n| n.height).collect();
        assert_eq!(ancestry, vec![2, 1, 0]);
    }

    #[test]
    fn connectable_follows_bodies() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let a = child(&g, LOW_WORK_BITS, 1);
        let b = child(&a, LOW_WORK_BITS, 1);
        tree.connect(a.clone()).unwrap();
        tree.connect(b.clone()).unwrap();

        // Child body first: not connectable until its parent's body arrives
        tree.set_body_stored(&b.hash());
        assert!(!tree.is_connectable(&b.hash()));
        assert_eq!(tree.best_connectable().unwrap().hash, g.hash());

        tree.set_body_stored(&a.hash());
        assert!(tree.is_connectable(&a.hash()));
        assert_eq!(tree.best_connectable().unwrap().hash, b.hash());
    }

    #[test]
    fn prune_drops_only_dead_side_branches() {
        let g = genesis();
        let mut tree = HeaderTree::new(g.clone());
        let mut main = vec![g.clone()];
        for i in 0..6 {
            let next = child(main.last().unwrap(), LOW_WORK_BITS, i);
            tree.connect(next.clone()).unwrap();
            main.push(next);
        }
        let stale = child(&main[1], LOW_WORK_BITS, 100);
        let stale_child = child(&stale, LOW_WORK_BITS, 100);
        let recent = child(&main[4], LOW_WORK_BITS, 100);
        for h in [&stale, &stale_child, &recent] {
            tree.connect(h.clone()).unwrap();
        }

        let removed = tree.prune(4);
        assert_eq!(removed.len(), 2);
        assert!(!tree.contains(&stale.hash()));
        assert!(!tree.contains(&stale_child.hash()));
        assert!(tree.contains(&recent.hash()));
        assert!(main.iter().all(|h| tree.contains(&h.hash())));
        assert!(!tree.children(&main[1].hash()).contains(&stale.hash()));
    }

    #[test]
    fn rejected_headers_are_forgotten_below_finality() {
        let g = genesis();
        let mut tree = HeaderTree::new(g);
        tree.record_rejected(Hash::from_u64_word(1), 2);
        tree.record_rejected(Hash::from_u64_word(2), 9);

        tree.prune(5);
        assert!(!tree.is_rejected(&Hash::from_u64_word(1)));
        assert!(tree.is_rejected(&Hash::from_u64_word(2)));
    }

    #[test]
    fn rejected_headers_are_bounded() {
        let mut tree = HeaderTree::new(genesis());
        for i in 0..MAX_REJECTED as u64 + 5 {
            tree.record_rejected(Hash::from_u64_word(i + 1), i + 1);
        }
        assert_eq!(tree.rejected_count(), MAX_REJECTED);
        // The lowest entries made room for the newest ones
        assert!(!tree.is_rejected(&Hash::from_u64_word(1)));
        assert!(tree.is_rejected(&Hash::from_u64_word(MAX_REJECTED as u64 + 5)));
    }
}
