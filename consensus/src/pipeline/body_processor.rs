//! Body processor
//!
//! Runs the integrity and partial stages over a block whose header is in the
//! tree, then stores the body. Neither stage reads the coin view, so bodies
//! of competing branches are checked without the mutation section.

use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::config::Params;
use consensus_core::errors::{ConsensusError, ConsensusResult};
use parking_lot::RwLock;

use super::Clock;
use crate::consensus::rules;
use crate::consensus::storage::BlockStore;
use crate::consensus::tree::{ChainedHeader, HeaderTree};
use crate::consensus::validation::{ChainContext, RuleContext, RulePipeline, Stage, ValidationState};

pub struct BodyProcessor {
    params: Arc<Params>,
    pipeline: Arc<RulePipeline>,
    tree: Arc<RwLock<HeaderTree>>,
    block_store: Arc<BlockStore>,
    clock: Clock,
}

impl BodyProcessor {
    pub fn new(params: Arc<Params>, pipeline: Arc<RulePipeline>, tree: Arc<RwLock<HeaderTree>>, block_store: Arc<BlockStore>, clock: Clock) -> Self {
        Self { params, pipeline, tree, block_store, clock }
    }

    /// Checks and stores the body of `node`. A rejected body marks the header
    /// and its descendants invalid, unless the transactions do not match the
    /// header commitment: then only this copy of the body is refused.
    pub fn process_body(&self, block: Arc<Block>, node: &Arc<ChainedHeader>) -> ConsensusResult<()> {
        // Keep the header that passed validation, signature included
        let block = if block.header == node.header { block } else { Arc::new(Block::new(node.header.clone(), block.transactions.clone())) };

        let chain = {
            let tree = self.tree.read();
            let parent = tree
                .get(&node.parent_hash())
                .ok_or_else(|| ConsensusError::InvalidParent { hash: node.hash, reason: "parent was pruned".to_string() })?;
            ChainContext::from_tree(&tree, parent, &self.params)
        };

        let mut ctx = RuleContext::for_block(&self.params, &block, chain, (self.clock)()).with_state(ValidationState::HeaderValidated);
        self.pipeline.run(&mut ctx, Stage::Partial)?;
        if let Some(error) = ctx.state.error().cloned() {
            if rules::failure_binds_hash(&error) {
                self.tree.write().mark_invalid(&node.hash, error.ban_peer());
                tracing::warn!("block {} rejected: {}", node.hash, error);
            } else {
                tracing::warn!("body received for {} does not match its header: {}", node.hash, error);
            }
            return Err(ConsensusError::Rejected { hash: node.hash, error });
        }

        self.block_store.store_block(block)?;
        self.tree.write().set_body_stored(&node.hash);
        Ok(())
    }
}
