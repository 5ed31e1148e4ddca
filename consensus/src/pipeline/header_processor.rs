//! Header processor
//!
//! Validates headers against their parent's chain context and places them in
//! the header tree. Only the header stage runs here, so headers of side
//! branches are accepted without touching the coin view or the mutation
//! section.

use std::sync::Arc;

use consensus_core::config::Params;
use consensus_core::errors::{ConsensusError, ConsensusResult};
use consensus_core::header::Header;
use parking_lot::RwLock;

use super::Clock;
use crate::consensus::rules;
use crate::consensus::storage::BlockStore;
use crate::consensus::tree::{ChainedHeader, HeaderTree};
use crate::consensus::validation::{ChainContext, RuleContext, RulePipeline, Stage};

pub struct HeaderProcessor {
    params: Arc<Params>,
    pipeline: Arc<RulePipeline>,
    tree: Arc<RwLock<HeaderTree>>,
    block_store: Arc<BlockStore>,
    clock: Clock,
}

impl HeaderProcessor {
    pub fn new(params: Arc<Params>, pipeline: Arc<RulePipeline>, tree: Arc<RwLock<HeaderTree>>, block_store: Arc<BlockStore>, clock: Clock) -> Self {
        Self { params, pipeline, tree, block_store, clock }
    }

    /// Validates `header` and connects it to the tree
    pub fn process_header(&self, header: Header) -> ConsensusResult<Arc<ChainedHeader>> {
        let hash = header.hash();
        let chain = {
            let tree = self.tree.read();
            if tree.contains(&hash) {
                return Err(ConsensusError::Duplicate(hash));
            }
            if tree.is_rejected(&hash) {
                return Err(ConsensusError::KnownInvalid(hash));
            }
            let parent = tree.get(&header.hash_prev_block).ok_or(ConsensusError::OrphanHeader { hash, parent: header.hash_prev_block })?;
            if tree.is_invalid(&parent.hash) {
                return Err(ConsensusError::InvalidParent { hash, reason: format!("parent {} is invalid", parent.hash) });
            }
            ChainContext::from_tree(&tree, parent, &self.params)
        };

        let mut ctx = RuleContext::for_header(&self.params, &header, chain, (self.clock)());
        self.pipeline.run(&mut ctx, Stage::Header)?;
        if let Some(error) = ctx.state.error().cloned() {
            if !error.is_transient() && rules::failure_binds_hash(&error) {
                self.tree.write().record_rejected(hash, ctx.chain.prev.height + 1);
            }
            tracing::debug!("header {} rejected: {}", hash, error);
            return Err(ConsensusError::Rejected { hash, error });
        }

        let node = self.tree.write().connect(header)?;
        self.block_store.store_header(&node.header)?;
        tracing::trace!("accepted header {} at height {}", hash, node.height);
        Ok(node)
    }
}
