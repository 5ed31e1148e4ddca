//! Consensus manager
//!
//! Front door of the chain-state engine. Headers and blocks from any number
//! of producers come in through [`ConsensusManager::submit_header`] and
//! [`ConsensusManager::submit_block`]; header, integrity and partial
//! validation run concurrently, while connecting blocks and moving the active
//! tip happen one at a time inside the mutation section.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::config::{genesis_block, Params};
use consensus_core::constants::MEDIAN_TIME_SPAN;
use consensus_core::errors::{ConsensusError, ConsensusResult};
use consensus_core::header::Header;
use consensus_core::tx::TransactionOutpoint;
use consensus_core::utxo::UtxoCollection;
use consensus_core::Hash;
use database::stores::{BlockStore as DbBlockStore, CoinStore, HeaderStore as DbHeaderStore, MemoryCoinStore, UtxoStore};
use database::Database;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use super::body_processor::BodyProcessor;
use super::deps_manager::DepsManager;
use super::header_processor::HeaderProcessor;
use super::notify::{ChainEvent, EventBus};
use super::reorg::ChainSelector;
use super::{system_clock, Clock};
use crate::consensus::storage::{BlockStore, CoinSource, CoinView, CoinViewError, FetchCoinsResponse};
use crate::consensus::tree::{BlockStatus, ChainedHeader, HeaderTree};
use crate::consensus::validation::{LockPoints, RulePipeline};
use crate::process::past_median_time::past_median_time;

const BLOCK_CACHE_SIZE: usize = 256;
const HEADER_CACHE_SIZE: usize = 4096;

/// Where a submitted block ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Part of the active chain
    Connected,
    /// Valid so far, on a branch with less work than the active chain
    SideBranch,
    /// Parent unknown; parked until it arrives
    Orphan,
    /// Forks off the active chain below the finality depth
    Stale,
}

/// Backing stores of the engine
pub struct ConsensusStorage {
    pub coin_store: Arc<dyn CoinStore>,
    pub block_store: BlockStore,
}

impl ConsensusStorage {
    pub fn in_memory() -> Self {
        Self { coin_store: Arc::new(MemoryCoinStore::new()), block_store: BlockStore::new() }
    }

    pub fn rocksdb(db: Arc<Database>) -> Self {
        let blocks = Arc::new(DbBlockStore::new(db.clone(), BLOCK_CACHE_SIZE));
        let headers = Arc::new(DbHeaderStore::new(db.clone(), HEADER_CACHE_SIZE));
        Self { coin_store: Arc::new(UtxoStore::new(db)), block_store: BlockStore::new_with_db(blocks, headers) }
    }
}

pub struct ConsensusManager {
    params: Arc<Params>,
    tree: Arc<RwLock<HeaderTree>>,
    coin_view: Arc<CoinView>,
    block_store: Arc<BlockStore>,
    header_processor: HeaderProcessor,
    body_processor: BodyProcessor,
    selector: ChainSelector,
    orphans: DepsManager,
    events: EventBus,
    active_tip: Arc<RwLock<Arc<ChainedHeader>>>,
    /// Chain mutation section
    mutation: Mutex<()>,
}

impl ConsensusManager {
    pub fn new(params: Params, storage: ConsensusStorage) -> ConsensusResult<Self> {
        Self::with_clock(params, storage, system_clock())
    }

    /// Builds the engine, restoring persisted headers and the coin view tip
    pub fn with_clock(params: Params, storage: ConsensusStorage, clock: Clock) -> ConsensusResult<Self> {
        let params = Arc::new(params);
        let pipeline = Arc::new(RulePipeline::new(params.clone()).map_err(ConsensusError::InvalidConfiguration)?);
        let genesis = genesis_block(&params);

        let block_store = Arc::new(storage.block_store);
        block_store.store_header(&genesis.block.header)?;
        block_store.store_block(Arc::new(genesis.block.clone()))?;

        let tree = HeaderTree::new(genesis.block.header.clone());
        let genesis_node = tree.genesis();
        let tree = Arc::new(RwLock::new(tree));
        let coin_view = Arc::new(CoinView::new(
            storage.coin_store,
            genesis.hash,
            params.undo_depth,
            params.coin_cache_max_entries,
            params.coin_cache_max_bytes,
        )?);
        let active_tip = Arc::new(RwLock::new(genesis_node));
        let events = EventBus::default();

        let manager = Self {
            header_processor: HeaderProcessor::new(params.clone(), pipeline.clone(), tree.clone(), block_store.clone(), clock.clone()),
            body_processor: BodyProcessor::new(params.clone(), pipeline.clone(), tree.clone(), block_store.clone(), clock.clone()),
            selector: ChainSelector::new(
                params.clone(),
                pipeline,
                tree.clone(),
                coin_view.clone(),
                block_store.clone(),
                events.clone(),
                active_tip.clone(),
                clock,
            ),
            orphans: DepsManager::new(params.orphan_pool_size),
            params,
            tree,
            coin_view,
            block_store,
            events,
            active_tip,
            mutation: Mutex::new(()),
        };
        manager.restore()?;
        Ok(manager)
    }

    /// Rebuilds the tree from persisted headers and re-derives the active
    /// chain from the coin view tip
    fn restore(&self) -> ConsensusResult<()> {
        let _guard = self.mutation.lock();
        let headers = self.block_store.load_headers()?;
        let tip_hash = self.coin_view.tip();
        {
            let mut tree = self.tree.write();
            for header in headers {
                if header.is_genesis() {
                    continue;
                }
                match tree.connect(header) {
                    Ok(_) | Err(ConsensusError::Duplicate(_)) => {}
                    Err(err) => tracing::warn!("skipping persisted header: {}", err),
                }
            }

            let tip = tree.get(&tip_hash).ok_or_else(|| ConsensusError::Storage(format!("coin view tip {tip_hash} is not a known header")))?;
            let active = tree
                .path(&tree.genesis(), &tip)
                .ok_or_else(|| ConsensusError::Storage(format!("coin view tip {tip_hash} does not descend from genesis")))?;
            for node in &active {
                tree.set_active(&node.hash, true);
                tree.set_fully_validated(&node.hash);
            }
            for node in tree.nodes_by_height() {
                if !tree.is_active(&node.hash) && self.block_store.has_block(&node.hash)? {
                    tree.set_body_stored(&node.hash);
                }
            }
            if tree.len() > 1 {
                tracing::info!("restored {} headers, active tip {} at height {}", tree.len(), tip.hash, tip.height);
            }
            *self.active_tip.write() = tip;
        }
        self.selector.activate_best_chain().map(|_| ())
    }

    pub fn params(&self) -> &Arc<Params> {
        &self.params
    }

    /// Tip of the active chain
    pub fn get_best_tip(&self) -> Arc<ChainedHeader> {
        self.active_tip.read().clone()
    }

    /// Header with the most work, whether or not its body is known
    pub fn best_header(&self) -> Arc<ChainedHeader> {
        self.tree.read().best_tip()
    }

    pub fn header(&self, hash: &Hash) -> Option<Arc<ChainedHeader>> {
        self.tree.read().get(hash)
    }

    pub fn block_status(&self, hash: &Hash) -> Option<BlockStatus> {
        self.tree.read().status(hash)
    }

    pub fn is_active(&self, hash: &Hash) -> bool {
        self.tree.read().is_active(hash)
    }

    pub fn get_block(&self, hash: &Hash) -> ConsensusResult<Option<Arc<Block>>> {
        self.block_store.get_block(hash)
    }

    /// Hashes of the active chain from genesis to the tip
    pub fn active_chain(&self) -> Vec<Hash> {
        let tip = self.get_best_tip();
        let tree = self.tree.read();
        let mut chain: Vec<Hash> = tree.ancestry(&tip.hash, tip.height as usize + 1).iter().map(|node| node.hash).collect();
        chain.reverse();
        chain
    }

    pub fn coin_view(&self) -> &Arc<CoinView> {
        &self.coin_view
    }

    pub fn fetch_coins(&self, outpoints: &HashSet<TransactionOutpoint>) -> Result<FetchCoinsResponse, CoinViewError> {
        self.coin_view.fetch_coins(outpoints)
    }

    /// Full copy of the UTXO set at the coin view tip
    pub fn utxo_snapshot(&self) -> ConsensusResult<(Hash, UtxoCollection)> {
        Ok(self.coin_view.snapshot()?)
    }

    /// Lock points a transaction entering the next block is checked against
    pub fn next_block_lock_points(&self) -> LockPoints {
        self.lock_points_after(&self.get_best_tip())
    }

    /// Lock points of a block built on `tip`
    pub fn lock_points_after(&self, tip: &ChainedHeader) -> LockPoints {
        let ancestry = self.tree.read().ancestry(&tip.hash, MEDIAN_TIME_SPAN);
        LockPoints { height: tip.height + 1, median_time_past: past_median_time(&ancestry) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.len()
    }

    /// Writes the cached coin view state to the backing store
    pub fn flush(&self) -> ConsensusResult<()> {
        let _guard = self.mutation.lock();
        Ok(self.coin_view.flush()?)
    }

    /// Validates and records a header without its body.
    ///
    /// A header alone never moves the active chain, however much work it
    /// carries: only connectable blocks are candidates, so its branch is
    /// considered again when [`Self::submit_block`] delivers its missing bodies.
    pub fn submit_header(&self, header: Header) -> ConsensusResult<Arc<ChainedHeader>> {
        let node = self.header_processor.process_header(header)?;
        let tip = self.get_best_tip();
        if node.chain_work > tip.chain_work {
            tracing::debug!("header {} carries more work than the active tip; its branch cannot activate until the bodies arrive", node.hash);
        }
        Ok(node)
    }

    /// Validates a block and moves the active chain onto it when its branch
    /// carries the most work. Orphans waiting for it are processed afterwards.
    pub fn submit_block(&self, block: impl Into<Arc<Block>>) -> ConsensusResult<SubmitOutcome> {
        let block = block.into();
        let hash = block.hash();
        let outcome = self.process_block(block)?;
        if matches!(outcome, SubmitOutcome::Connected | SubmitOutcome::SideBranch) {
            self.process_orphans(hash)?;
        }
        Ok(outcome)
    }

    fn process_block(&self, block: Arc<Block>) -> ConsensusResult<SubmitOutcome> {
        let hash = block.hash();
        if self.orphans.is_orphan(&hash) {
            return Err(ConsensusError::Duplicate(hash));
        }

        let existing = {
            let tree = self.tree.read();
            match tree.status(&hash) {
                Some(status) if status.is_invalid() => return Err(ConsensusError::KnownInvalid(hash)),
                Some(status) if status.has_body() => return Err(ConsensusError::Duplicate(hash)),
                _ => tree.get(&hash),
            }
        };
        let node = match existing {
            Some(node) => node,
            None => match self.header_processor.process_header(block.header.clone()) {
                Ok(node) => node,
                Err(ConsensusError::OrphanHeader { parent, .. }) => {
                    tracing::debug!("block {} is an orphan, waiting for {}", hash, parent);
                    self.orphans.add_orphan(block);
                    return Ok(SubmitOutcome::Orphan);
                }
                Err(err) => return Err(err),
            },
        };

        if self.is_stale(&node) {
            tracing::debug!("block {} forks below the finality depth", hash);
            return Ok(SubmitOutcome::Stale);
        }

        self.body_processor.process_body(block, &node)?;

        let activation = {
            let _guard = self.mutation.lock();
            self.selector.activate_best_chain().inspect_err(|err| {
                if err.is_fatal() {
                    tracing::error!("fatal chain state fault while activating {}: {}", hash, err);
                }
            })?
        };

        if let Some(error) = activation.rejection(&hash) {
            return Err(ConsensusError::Rejected { hash, error: error.clone() });
        }
        let tree = self.tree.read();
        if tree.is_active(&hash) {
            Ok(SubmitOutcome::Connected)
        } else if tree.is_invalid(&hash) {
            Err(ConsensusError::InvalidParent { hash, reason: "an ancestor failed to connect".to_string() })
        } else {
            Ok(SubmitOutcome::SideBranch)
        }
    }

    fn is_stale(&self, node: &Arc<ChainedHeader>) -> bool {
        let tip = self.get_best_tip();
        let tree = self.tree.read();
        match tree.find_fork(&tip, node) {
            Some(fork) => fork.hash != node.hash && fork.height < self.params.finality_height(tip.height),
            None => true,
        }
    }

    fn process_orphans(&self, parent: Hash) -> ConsensusResult<()> {
        let mut queue = VecDeque::from([parent]);
        while let Some(parent) = queue.pop_front() {
            for orphan in self.orphans.take_children(&parent) {
                let hash = orphan.hash();
                match self.process_block(orphan) {
                    Ok(SubmitOutcome::Connected | SubmitOutcome::SideBranch) => queue.push_back(hash),
                    Ok(_) => {}
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => tracing::debug!("orphan {} rejected: {}", hash, err),
                }
            }
        }
        Ok(())
    }
}
