//! Proof-of-stake rules
//!
//! Heights up to `last_pow_height` are mined and validated like a
//! proof-of-work chain. Above it every block carries a coinstake at index 1
//! whose first input is the stake kernel.

use consensus_core::errors::{RuleError, RuleResult};
use consensus_core::tx::{TransactionOutpoint, COINSTAKE_TRANSACTION_INDEX};
use consensus_core::Hash;
use consensus_pow::{check_pow, compact_to_target};
use crypto_hashes::HashWriter;
use primitive_types::{U256, U512};

use super::full::check_coinbase_reward;
use super::pow::expected_bits;
use super::transaction::total_input;
use crate::consensus::validation::{Rule, RuleContext, RulePipeline, Stage};
use crate::process::coinbase::calc_block_subsidy;

pub fn register(pipeline: &mut RulePipeline) -> Result<(), String> {
    pipeline.register(Stage::Header, Box::new(StakeHeader))?;
    pipeline.register(Stage::Partial, Box::new(StakeDifficulty))?;
    pipeline.register(Stage::Partial, Box::new(CoinstakeStructure))?;
    pipeline.register(Stage::Full, Box::new(StakeKernel))?;
    pipeline.register(Stage::Full, Box::new(StakeReward))
}

/// Kernel hash of staking `outpoint` on top of `prev` at `timestamp`
pub fn stake_kernel_hash(prev: &Hash, outpoint: &TransactionOutpoint, timestamp: u64) -> Hash {
    let mut hasher = HashWriter::new();
    hasher.update(prev).update(outpoint.to_key()).write_u64(timestamp);
    hasher.finalize()
}

/// A kernel meets the target when its hash is at most `target * amount`
pub fn kernel_meets_target(kernel: &Hash, bits: u32, amount: u64) -> bool {
    let Ok(target) = compact_to_target(bits) else {
        return false;
    };
    let weighted: U512 = target.full_mul(U256::from(amount));
    U512::from(U256::from_little_endian(kernel.as_bytes())) <= weighted
}

pub struct StakeHeader;

impl Rule for StakeHeader {
    fn name(&self) -> &'static str {
        "stake-header"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let params = ctx.params;
        if !ctx.is_stake_height() {
            return check_pow(ctx.header, params.pow_limit_bits).map_err(|err| RuleError::violation(self.name(), err.to_string()));
        }
        if ctx.header.timestamp & params.stake_timestamp_mask != 0 {
            return Err(RuleError::violation(self.name(), format!("timestamp {} does not match the stake mask", ctx.header.timestamp)));
        }
        let target = compact_to_target(ctx.header.bits).map_err(|err| RuleError::violation(self.name(), err.to_string()))?;
        let limit = compact_to_target(params.pos_limit_bits).map_err(|err| RuleError::violation(self.name(), err.to_string()))?;
        if target.is_zero() || target > limit {
            return Err(RuleError::violation(self.name(), format!("stake bits {:#010x} out of range", ctx.header.bits)));
        }
        Ok(())
    }
}

pub struct StakeDifficulty;

impl Rule for StakeDifficulty {
    fn name(&self) -> &'static str {
        "difficulty"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let expected = if ctx.is_stake_height() { ctx.params.pos_limit_bits } else { expected_bits(ctx, self.name())? };
        if ctx.header.bits != expected {
            return Err(RuleError::violation(self.name(), format!("bits {:#010x}, expected {expected:#010x}", ctx.header.bits)));
        }
        Ok(())
    }
}

/// Stake blocks carry an empty coinbase followed by exactly one coinstake
pub struct CoinstakeStructure;

impl Rule for CoinstakeStructure {
    fn name(&self) -> &'static str {
        "coinstake-structure"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        if !ctx.is_stake_height() {
            return Ok(());
        }
        let txs = ctx.transactions();
        if ctx.coinstake_index().is_none() {
            return Err(RuleError::violation(self.name(), "stake block without coinstake at index 1"));
        }
        if let Some(extra) = txs.iter().skip(COINSTAKE_TRANSACTION_INDEX + 1).position(|tx| tx.is_coinstake()) {
            return Err(RuleError::violation(self.name(), format!("second coinstake at index {}", extra + COINSTAKE_TRANSACTION_INDEX + 1)));
        }
        if txs.first().and_then(|coinbase| coinbase.total_output()) != Some(0) {
            return Err(RuleError::violation(self.name(), "coinbase of a stake block must not pay out"));
        }
        Ok(())
    }
}

pub struct StakeKernel;

impl Rule for StakeKernel {
    fn name(&self) -> &'static str {
        "stake-kernel"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let Some(index) = ctx.coinstake_index() else {
            return Ok(());
        };
        let coinstake = &ctx.transactions()[index];
        let (Some(input), Some(coin)) = (coinstake.inputs.first(), ctx.input_coins.get(index).and_then(|coins| coins.first())) else {
            return Err(RuleError::violation(self.name(), "coinstake has no kernel input"));
        };

        let age = ctx.height().saturating_sub(coin.block_height);
        if age < ctx.params.coinbase_maturity {
            return Err(RuleError::violation(self.name(), format!("kernel {} is {age} blocks old", input.previous_outpoint)));
        }
        let kernel = stake_kernel_hash(&ctx.chain.prev.hash, &input.previous_outpoint, ctx.header.timestamp);
        if !kernel_meets_target(&kernel, ctx.header.bits, coin.amount) {
            return Err(RuleError::violation(self.name(), format!("kernel hash {kernel} misses the weighted target")));
        }
        Ok(())
    }
}

pub struct StakeReward;

impl Rule for StakeReward {
    fn name(&self) -> &'static str {
        "block-reward"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let Some(index) = ctx.coinstake_index() else {
            return check_coinbase_reward(ctx, self.name(), calc_block_subsidy(ctx.params, ctx.height()));
        };
        let coinstake = &ctx.transactions()[index];
        let staked = ctx.input_coins.get(index).and_then(|coins| total_input(coins)).unwrap_or_default();
        let produced = coinstake.total_output().ok_or_else(|| RuleError::structural(self.name(), "coinstake outputs overflow"))?;
        let allowed = staked.saturating_add(ctx.params.stake_reward).saturating_add(ctx.fees);
        if produced > allowed {
            return Err(RuleError::violation(self.name(), format!("coinstake produces {produced}, allowed {allowed}")));
        }
        Ok(())
    }
}
