//! Proof-of-authority rules
//!
//! Time is cut into slots of `target_spacing` seconds and the federation
//! members take turns: the block of slot `s` must be signed by
//! `federation[s % n]`. Federation changes are proposed through voting data
//! carried in coinbase data outputs.

use std::collections::HashSet;

use consensus_core::config::Params;
use consensus_core::constants::VOTING_DATA_MAGIC;
use consensus_core::errors::{RuleError, RuleResult};
use consensus_core::sign::verify_signature;

use super::full::check_coinbase_reward;
use crate::consensus::validation::{Rule, RuleContext, RulePipeline, Stage};

pub const AUTHORITY_SIGNATURE: &str = "authority-signature";
pub const VOTE_ADD_MEMBER: u8 = 0;
pub const VOTE_REMOVE_MEMBER: u8 = 1;
const VOTE_KEY_SIZE: usize = 33;
const VOTING_DATA_SIZE: usize = VOTING_DATA_MAGIC.len() + 1 + VOTE_KEY_SIZE;

pub fn register(pipeline: &mut RulePipeline) -> Result<(), String> {
    pipeline.register(Stage::Header, Box::new(AuthoritySlot))?;
    pipeline.register(Stage::Header, Box::new(AuthoritySignature::default()))?;
    pipeline.register(Stage::Partial, Box::new(VotingData::default()))?;
    pipeline.register(Stage::Full, Box::new(AuthorityReward))
}

pub fn slot_of(timestamp: u64, spacing: u64) -> u64 {
    timestamp / spacing.max(1)
}

/// Index of the federation member expected to sign at `timestamp`
pub fn slot_signer_index(timestamp: u64, spacing: u64, federation_size: usize) -> Option<usize> {
    (federation_size > 0).then(|| (slot_of(timestamp, spacing) % federation_size as u64) as usize)
}

/// Payload of a data output voting on `key`
pub fn voting_data(kind: u8, key: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(VOTING_DATA_SIZE);
    data.extend_from_slice(&VOTING_DATA_MAGIC);
    data.push(kind);
    data.extend_from_slice(key);
    data
}

/// Each block occupies a later slot than its parent and keeps the fixed bits
pub struct AuthoritySlot;

impl Rule for AuthoritySlot {
    fn name(&self) -> &'static str {
        "authority-slot"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let spacing = ctx.params.target_spacing;
        let slot = slot_of(ctx.header.timestamp, spacing);
        let prev_slot = slot_of(ctx.chain.prev.timestamp(), spacing);
        if slot <= prev_slot {
            return Err(RuleError::violation(self.name(), format!("slot {slot} does not advance past parent slot {prev_slot}")));
        }
        if ctx.header.bits != ctx.params.genesis_bits {
            return Err(RuleError::violation(self.name(), format!("bits {:#010x} differ from the network bits", ctx.header.bits)));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct AuthoritySignature {
    federation: Vec<Vec<u8>>,
}

impl Rule for AuthoritySignature {
    fn name(&self) -> &'static str {
        AUTHORITY_SIGNATURE
    }

    fn initialize(&mut self, params: &Params) -> Result<(), String> {
        self.federation = params.federation_keys()?;
        if self.federation.is_empty() {
            return Err("proof of authority needs at least one federation member".to_string());
        }
        Ok(())
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let index = slot_signer_index(ctx.header.timestamp, ctx.params.target_spacing, self.federation.len())
            .ok_or_else(|| RuleError::violation(self.name(), "empty federation"))?;
        if !verify_signature(&self.federation[index], &ctx.hash, &ctx.header.signature) {
            return Err(RuleError::violation(self.name(), format!("header is not signed by federation member {index}")));
        }
        Ok(())
    }
}

/// Voting data in the coinbase must be well formed and consistent with the
/// current federation
#[derive(Default)]
pub struct VotingData {
    members: HashSet<Vec<u8>>,
}

impl Rule for VotingData {
    fn name(&self) -> &'static str {
        "voting-data"
    }

    fn initialize(&mut self, params: &Params) -> Result<(), String> {
        self.members = params.federation_keys()?.into_iter().collect();
        Ok(())
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let Some(coinbase) = ctx.transactions().first() else {
            return Ok(());
        };
        let votes = coinbase.outputs.iter().filter_map(|output| output.script_public_key.data()).filter(|data| data.starts_with(&VOTING_DATA_MAGIC));
        for vote in votes {
            if vote.len() != VOTING_DATA_SIZE {
                return Err(RuleError::violation(self.name(), format!("voting data of {} bytes", vote.len())));
            }
            let kind = vote[VOTING_DATA_MAGIC.len()];
            let key = &vote[VOTING_DATA_MAGIC.len() + 1..];
            let is_member = self.members.contains(key);
            match kind {
                VOTE_ADD_MEMBER if is_member => return Err(RuleError::violation(self.name(), "vote adds an existing member")),
                VOTE_REMOVE_MEMBER if !is_member => return Err(RuleError::violation(self.name(), "vote removes a non-member")),
                VOTE_REMOVE_MEMBER if self.members.len() == 1 => return Err(RuleError::violation(self.name(), "vote removes the last member")),
                VOTE_ADD_MEMBER | VOTE_REMOVE_MEMBER => {}
                other => return Err(RuleError::violation(self.name(), format!("unknown vote kind {other}"))),
            }
        }
        Ok(())
    }
}

pub struct AuthorityReward;

impl Rule for AuthorityReward {
    fn name(&self) -> &'static str {
        "block-reward"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        check_coinbase_reward(ctx, self.name(), ctx.params.poa_block_reward)
    }
}
