//! Proof-of-work rules

use consensus_core::errors::{RuleError, RuleResult};
use consensus_pow::{check_pow, retarget};

use super::full::check_coinbase_reward;
use crate::consensus::validation::{Rule, RuleContext, RulePipeline, Stage};
use crate::process::coinbase::calc_block_subsidy;

pub fn register(pipeline: &mut RulePipeline) -> Result<(), String> {
    pipeline.register(Stage::Header, Box::new(ProofOfWork))?;
    pipeline.register(Stage::Partial, Box::new(Difficulty))?;
    pipeline.register(Stage::Full, Box::new(SubsidyReward))
}

pub struct ProofOfWork;

impl Rule for ProofOfWork {
    fn name(&self) -> &'static str {
        "proof-of-work"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        check_pow(ctx.header, ctx.params.pow_limit_bits).map_err(|err| RuleError::violation(self.name(), err.to_string()))
    }
}

/// Bits the candidate must carry: the parent's bits, or a retarget over the
/// closing window at retarget boundaries
pub(crate) fn expected_bits(ctx: &RuleContext<'_>, rule: &'static str) -> RuleResult<u32> {
    let params = ctx.params;
    let prev = &ctx.chain.prev;
    match &ctx.chain.window_start {
        Some(start) if !params.pow_no_retargeting => {
            let actual = prev.timestamp().saturating_sub(start.timestamp());
            let target = params.retarget_interval * params.target_spacing;
            retarget(prev.header.bits, actual, target, params.pow_limit_bits).map_err(|err| RuleError::violation(rule, err.to_string()))
        }
        _ => Ok(prev.header.bits),
    }
}

pub struct Difficulty;

impl Rule for Difficulty {
    fn name(&self) -> &'static str {
        "difficulty"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let expected = expected_bits(ctx, self.name())?;
        if ctx.header.bits != expected {
            return Err(RuleError::violation(self.name(), format!("bits {:#010x}, expected {expected:#010x}", ctx.header.bits)));
        }
        Ok(())
    }
}

pub struct SubsidyReward;

impl Rule for SubsidyReward {
    fn name(&self) -> &'static str {
        "block-reward"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        check_coinbase_reward(ctx, self.name(), calc_block_subsidy(ctx.params, ctx.height()))
    }
}
