//! Rules that read the coin view
//!
//! [`CheckSpends`] runs first: it resolves every input, records the spent
//! entries per transaction in the context and builds the block's changeset.
//! The remaining rules only read what it left behind.

use std::collections::{HashMap, HashSet};

use consensus_core::errors::{RuleError, RuleResult};
use consensus_core::tx::{TransactionOutpoint, UtxoEntry};
use consensus_core::utxo::UtxoDiff;

use super::transaction::{calc_fee, check_maturity, check_scripts, check_sequence_locks, COIN_MATURITY, SCRIPT_VERIFICATION, SEQUENCE_LOCKS, TX_FEES};
use crate::consensus::validation::{Rule, RuleContext};

/// Every input spends a coin of the parent chain or an earlier output of the
/// same block, and no coin is spent twice.
pub struct CheckSpends;

impl Rule for CheckSpends {
    fn name(&self) -> &'static str {
        "check-spends"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let txs = ctx.transactions();
        let height = ctx.height();
        let coinstake = ctx.coinstake_index();

        let mut created: HashMap<TransactionOutpoint, UtxoEntry> = HashMap::new();
        let mut spent: HashSet<TransactionOutpoint> = HashSet::new();
        let mut input_coins = Vec::with_capacity(txs.len());
        let mut diff = UtxoDiff::new();

        for (index, tx) in txs.iter().enumerate() {
            let mut coins = Vec::with_capacity(tx.inputs.len());
            for input in &tx.inputs {
                let outpoint = input.previous_outpoint;
                if !spent.insert(outpoint) {
                    return Err(RuleError::missing_input(self.name(), outpoint));
                }
                let coin = match created.remove(&outpoint) {
                    Some(coin) => coin,
                    None => ctx.coins.get(&outpoint).cloned().flatten().ok_or_else(|| RuleError::missing_input(self.name(), outpoint))?,
                };
                diff.spend(outpoint, coin.clone());
                coins.push(coin);
            }

            let id = tx.id();
            for (output_index, output) in tx.outputs.iter().enumerate() {
                if output.script_public_key.is_unspendable() {
                    continue;
                }
                let coin = if tx.is_coinbase() {
                    UtxoEntry::new(output.value, output.script_public_key.clone(), height, true)
                } else if coinstake == Some(index) {
                    UtxoEntry::coinstake(output.value, output.script_public_key.clone(), height)
                } else {
                    UtxoEntry::new(output.value, output.script_public_key.clone(), height, false)
                };
                let outpoint = TransactionOutpoint::new(id, output_index as u32);
                created.insert(outpoint, coin.clone());
                diff.create(outpoint, coin);
            }
            input_coins.push(coins);
        }

        ctx.input_coins = input_coins;
        ctx.diff = diff;
        Ok(())
    }
}

pub struct CoinMaturity;

impl Rule for CoinMaturity {
    fn name(&self) -> &'static str {
        COIN_MATURITY
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let height = ctx.height();
        for (tx, coins) in ctx.transactions().iter().zip(&ctx.input_coins) {
            check_maturity(tx, coins, height, ctx.params.coinbase_maturity)?;
        }
        Ok(())
    }
}

pub struct SequenceLocks;

impl Rule for SequenceLocks {
    fn name(&self) -> &'static str {
        SEQUENCE_LOCKS
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let height = ctx.height();
        let lock_points = ctx
            .transactions()
            .iter()
            .zip(&ctx.input_coins)
            .map(|(tx, coins)| check_sequence_locks(tx, coins, height))
            .collect::<RuleResult<Vec<_>>>()?;
        ctx.tx_lock_points = lock_points;
        Ok(())
    }
}

pub struct ScriptVerification;

impl Rule for ScriptVerification {
    fn name(&self) -> &'static str {
        SCRIPT_VERIFICATION
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        ctx.transactions().iter().zip(&ctx.input_coins).try_for_each(|(tx, coins)| check_scripts(tx, coins))
    }
}

/// Sums the fees of every transaction but the reward transactions
pub struct CheckFees;

impl Rule for CheckFees {
    fn name(&self) -> &'static str {
        TX_FEES
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let coinstake = ctx.coinstake_index();
        let mut fees: u64 = 0;
        for (index, (tx, coins)) in ctx.transactions().iter().zip(&ctx.input_coins).enumerate() {
            if tx.is_coinbase() || coinstake == Some(index) {
                continue;
            }
            fees = fees
                .checked_add(calc_fee(tx, coins)?)
                .ok_or_else(|| RuleError::violation(self.name(), "block fees overflow"))?;
        }
        ctx.fees = fees;
        Ok(())
    }
}

/// Coinbase claims at most `reward + fees`
pub(crate) fn check_coinbase_reward(ctx: &RuleContext<'_>, rule: &'static str, reward: u64) -> RuleResult<()> {
    let claimed = ctx
        .transactions()
        .first()
        .and_then(|coinbase| coinbase.total_output())
        .ok_or_else(|| RuleError::structural(rule, "coinbase outputs overflow"))?;
    let allowed = reward.saturating_add(ctx.fees);
    if claimed > allowed {
        return Err(RuleError::violation(rule, format!("coinbase claims {claimed}, allowed {allowed}")));
    }
    Ok(())
}
