//! Active chain selection and reorganization
//!
//! [`ChainSelector::activate_best_chain`] moves the active chain to the
//! connectable block with the most work. It must only be called from inside
//! the chain mutation section.
//!
//! A reorganization rewinds the coin view back to the fork point one block at
//! a time and then connects the new branch in height order. If any connect
//! step fails, the blocks connected so far are rewound and the old branch is
//! reconnected, so the active tip only ever moves from the old tip straight to
//! the new one.

use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::config::Params;
use consensus_core::errors::{ConsensusError, ConsensusResult, RuleError};
use consensus_core::utxo::UtxoDiff;
use consensus_core::Hash;
use parking_lot::RwLock;

use super::notify::{ChainEvent, EventBus};
use super::Clock;
use crate::consensus::storage::{BlockStore, CoinView, CoinViewError};
use crate::consensus::tree::{ChainedHeader, HeaderTree};
use crate::consensus::validation::{ChainContext, RuleContext, RulePipeline, Stage, ValidationState};

const FINALITY_RULE: &str = "finality";

/// What one activation pass did
#[derive(Debug, Clone, Default)]
pub struct ActivationOutcome {
    pub connected: Vec<Hash>,
    pub disconnected: Vec<Hash>,
    /// Blocks that failed while trying to connect them
    pub rejected: Vec<(Hash, RuleError)>,
}

impl ActivationOutcome {
    pub fn rejection(&self, hash: &Hash) -> Option<&RuleError> {
        self.rejected.iter().find(|(rejected, _)| rejected == hash).map(|(_, error)| error)
    }
}

enum StepError {
    /// The block broke a consensus rule
    Rejected { hash: Hash, error: RuleError },
    /// Anything else; the attempt is abandoned
    Abort(ConsensusError),
}

impl From<CoinViewError> for StepError {
    fn from(err: CoinViewError) -> Self {
        StepError::Abort(err.into())
    }
}

impl From<ConsensusError> for StepError {
    fn from(err: ConsensusError) -> Self {
        StepError::Abort(err)
    }
}

struct Reorganized {
    disconnected: Vec<(Arc<ChainedHeader>, Arc<Block>)>,
    connected: Vec<(Arc<ChainedHeader>, Arc<Block>)>,
}

pub struct ChainSelector {
    params: Arc<Params>,
    pipeline: Arc<RulePipeline>,
    tree: Arc<RwLock<HeaderTree>>,
    coin_view: Arc<CoinView>,
    block_store: Arc<BlockStore>,
    events: EventBus,
    active_tip: Arc<RwLock<Arc<ChainedHeader>>>,
    clock: Clock,
}

impl ChainSelector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: Arc<Params>,
        pipeline: Arc<RulePipeline>,
        tree: Arc<RwLock<HeaderTree>>,
        coin_view: Arc<CoinView>,
        block_store: Arc<BlockStore>,
        events: EventBus,
        active_tip: Arc<RwLock<Arc<ChainedHeader>>>,
        clock: Clock,
    ) -> Self {
        Self { params, pipeline, tree, coin_view, block_store, events, active_tip, clock }
    }

    /// Reorganizes onto the best connectable block until no candidate has more
    /// work than the active tip. Failing candidates are marked invalid and the
    /// next best one is tried.
    pub fn activate_best_chain(&self) -> ConsensusResult<ActivationOutcome> {
        let mut outcome = ActivationOutcome::default();
        loop {
            let current = self.active_tip.read().clone();
            let Some(target) = self.tree.read().best_connectable() else { break };
            if target.chain_work <= current.chain_work {
                break;
            }

            let (fork, disconnect, connect) = {
                let tree = self.tree.read();
                let fork = tree.find_fork(&current, &target).ok_or_else(|| unlinked(&current, &target))?;
                let disconnect = tree.path(&fork, &current).ok_or_else(|| unlinked(&fork, &current))?;
                let connect = tree.path(&fork, &target).ok_or_else(|| unlinked(&fork, &target))?;
                (fork, disconnect, connect)
            };

            let reason = if fork.height < self.params.finality_height(current.height) {
                Some(format!("fork at height {} is below the finality depth", fork.height))
            } else if disconnect.len() > self.coin_view.undo_len() {
                Some(format!("disconnecting {} blocks exceeds the {} rewindable changesets", disconnect.len(), self.coin_view.undo_len()))
            } else {
                None
            };
            if let Some(reason) = reason {
                let Some(first) = connect.first() else { break };
                let error = RuleError::context_dependent(FINALITY_RULE, reason);
                tracing::warn!("refusing reorg to {}: {}", target.hash, error);
                self.tree.write().mark_invalid(&first.hash, false);
                outcome.rejected.push((first.hash, error));
                continue;
            }

            match self.reorganize(&disconnect, &connect) {
                Ok(done) => {
                    self.commit(&current, &target, &done)?;
                    outcome.disconnected.extend(done.disconnected.iter().map(|(node, _)| node.hash));
                    outcome.connected.extend(done.connected.iter().map(|(node, _)| node.hash));
                }
                Err(StepError::Rejected { hash, error }) => {
                    tracing::warn!("block {} failed to connect: {}", hash, error);
                    self.tree.write().mark_invalid(&hash, error.ban_peer());
                    outcome.rejected.push((hash, error));
                }
                Err(StepError::Abort(err)) => return Err(err),
            }
        }
        Ok(outcome)
    }

    fn reorganize(&self, disconnect: &[Arc<ChainedHeader>], connect: &[Arc<ChainedHeader>]) -> Result<Reorganized, StepError> {
        let mut done = Reorganized { disconnected: Vec::with_capacity(disconnect.len()), connected: Vec::with_capacity(connect.len()) };

        let mut bodies = Vec::with_capacity(disconnect.len());
        for node in disconnect.iter().rev() {
            bodies.push((node.clone(), self.load_block(node)?));
        }
        for (node, block) in bodies {
            let restored = self.coin_view.rewind()?;
            if restored != node.parent_hash() {
                return Err(StepError::Abort(ConsensusError::Storage(format!("rewinding {} restored {restored}", node.hash))));
            }
            done.disconnected.push((node, block));
        }

        for node in connect {
            match self.connect_block(node) {
                Ok(block) => done.connected.push((node.clone(), block)),
                Err(err) => {
                    self.rollback(&done)?;
                    return Err(err);
                }
            }
        }
        Ok(done)
    }

    /// Undoes a partial reorganization: rewinds what was connected and
    /// reconnects what was disconnected. Failing here leaves the coin view
    /// inconsistent, which is fatal.
    fn rollback(&self, done: &Reorganized) -> Result<(), StepError> {
        tracing::info!("rolling back reorg: rewinding {} connected blocks", done.connected.len());
        for _ in &done.connected {
            self.coin_view.rewind()?;
        }
        for (node, _) in done.disconnected.iter().rev() {
            match self.connect_block(node) {
                Ok(_) => {}
                Err(StepError::Rejected { hash, error }) => {
                    return Err(StepError::Abort(ConsensusError::Storage(format!("previously active block {hash} no longer connects: {error}"))));
                }
                Err(abort) => return Err(abort),
            }
        }
        Ok(())
    }

    fn commit(&self, from: &Arc<ChainedHeader>, to: &Arc<ChainedHeader>, done: &Reorganized) -> ConsensusResult<()> {
        {
            let mut tree = self.tree.write();
            for (node, _) in &done.disconnected {
                tree.set_active(&node.hash, false);
            }
            for (node, _) in &done.connected {
                tree.set_active(&node.hash, true);
                tree.set_fully_validated(&node.hash);
            }
        }
        *self.active_tip.write() = to.clone();

        if done.disconnected.is_empty() {
            tracing::info!("new tip {} at height {}", to.hash, to.height);
        } else {
            tracing::info!(
                "reorganized from {} to {} at height {} (disconnected {}, connected {})",
                from.hash,
                to.hash,
                to.height,
                done.disconnected.len(),
                done.connected.len()
            );
        }

        for (node, block) in &done.disconnected {
            self.events.publish(ChainEvent::disconnected(block.clone(), node.height));
        }
        for (node, block) in &done.connected {
            self.events.publish(ChainEvent::connected(block.clone(), node.height));
        }

        self.coin_view.flush()?;
        let pruned = self.tree.write().prune(self.params.finality_height(to.height));
        if !pruned.is_empty() {
            self.block_store.remove(&pruned)?;
        }
        Ok(())
    }

    fn load_block(&self, node: &ChainedHeader) -> Result<Arc<Block>, StepError> {
        self.block_store.get_block(&node.hash)?.ok_or_else(|| StepError::Abort(ConsensusError::Storage(format!("body of {} is missing", node.hash))))
    }

    /// Applies the changeset of `node` on top of its parent. If the coin view
    /// moved underneath, the tip is read again and the step retried once when
    /// the view is back at the parent.
    fn connect_block(&self, node: &Arc<ChainedHeader>) -> Result<Arc<Block>, StepError> {
        match self.try_connect(node) {
            Err(StepError::Abort(ConsensusError::ConcurrentModification { actual, .. })) => {
                let tip = self.coin_view.tip();
                if tip != node.parent_hash() {
                    tracing::warn!("coin view is at {} instead of {} while connecting {}", tip, node.parent_hash(), node.hash);
                    return Err(StepError::Abort(ConsensusError::ConcurrentModification { expected: node.parent_hash(), actual: tip }));
                }
                tracing::warn!("coin view moved to {} while connecting {}, retrying", actual, node.hash);
                self.try_connect(node)
            }
            other => other,
        }
    }

    /// Validates the block first if it never passed the full stage
    fn try_connect(&self, node: &Arc<ChainedHeader>) -> Result<Arc<Block>, StepError> {
        let block = self.load_block(node)?;
        let diff = match self.block_store.get_changeset(&node.hash) {
            Some(diff) => diff,
            None => self.validate_full(node, &block)?,
        };
        let spent: Vec<_> = diff.spent_outpoints().copied().collect();
        self.coin_view.save_changes(node.parent_hash(), node.hash, &spent, &diff.created)?;
        tracing::debug!("connected block {} at height {}", node.hash, node.height);
        Ok(block)
    }

    fn validate_full(&self, node: &Arc<ChainedHeader>, block: &Block) -> Result<Arc<UtxoDiff>, StepError> {
        let chain = {
            let tree = self.tree.read();
            let parent = tree.get(&node.parent_hash()).ok_or_else(|| unlinked(node, node))?;
            ChainContext::from_tree(&tree, parent, &self.params)
        };
        let mut ctx = RuleContext::for_block(&self.params, block, chain, (self.clock)())
            .with_coin_source(self.coin_view.as_ref())
            .with_state(ValidationState::PartiallyValidated);
        self.pipeline.run(&mut ctx, Stage::Full)?;
        if let Some(error) = ctx.state.error() {
            return Err(StepError::Rejected { hash: node.hash, error: error.clone() });
        }

        let diff = Arc::new(std::mem::take(&mut ctx.diff));
        self.block_store.store_changeset(node.hash, diff.clone());
        self.tree.write().set_fully_validated(&node.hash);
        Ok(diff)
    }
}

fn unlinked(a: &ChainedHeader, b: &ChainedHeader) -> ConsensusError {
    ConsensusError::Storage(format!("header tree has no path between {} and {}", a.hash, b.hash))
}
