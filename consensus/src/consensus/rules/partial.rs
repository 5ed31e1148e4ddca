//! Rules that need the block and cheap chain context but no coins

use consensus_core::errors::{RuleError, RuleResult};

use super::transaction::{check_finality, TX_FINALITY};
use crate::consensus::validation::{Rule, RuleContext};
use crate::process::coinbase::commits_to_height;

/// The coinbase payload starts with the block height, which keeps coinbase
/// ids unique across blocks
pub struct CoinbaseHeight;

impl Rule for CoinbaseHeight {
    fn name(&self) -> &'static str {
        "coinbase-height"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let height = ctx.height();
        match ctx.transactions().first() {
            Some(coinbase) if commits_to_height(coinbase, height) => Ok(()),
            _ => Err(RuleError::violation(self.name(), format!("coinbase does not commit to height {height}"))),
        }
    }
}

pub struct TransactionFinality;

impl Rule for TransactionFinality {
    fn name(&self) -> &'static str {
        TX_FINALITY
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let lock_points = ctx.lock_points;
        ctx.transactions().iter().try_for_each(|tx| check_finality(tx, &lock_points))
    }
}
