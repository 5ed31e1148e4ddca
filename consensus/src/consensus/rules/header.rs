//! Header rules shared by every consensus algorithm

use consensus_core::constants::BLOCK_VERSION;
use consensus_core::errors::{RuleError, RuleResult};

use crate::consensus::validation::{Rule, RuleContext};

pub struct CheckVersion;

impl Rule for CheckVersion {
    fn name(&self) -> &'static str {
        "header-version"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        if ctx.header.version < BLOCK_VERSION {
            return Err(RuleError::violation(self.name(), format!("version {} is obsolete", ctx.header.version)));
        }
        Ok(())
    }
}

/// The header must extend the chain context it is validated against
pub struct CheckParent;

impl Rule for CheckParent {
    fn name(&self) -> &'static str {
        "header-parent"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let prev = &ctx.chain.prev;
        if ctx.header.hash_prev_block != prev.hash {
            return Err(RuleError::structural(self.name(), format!("header points at {}, context is {}", ctx.header.hash_prev_block, prev.hash)));
        }
        if ctx.header.height != prev.height + 1 {
            return Err(RuleError::structural(self.name(), format!("height {} does not follow {}", ctx.header.height, prev.height)));
        }
        Ok(())
    }
}

/// Timestamp must be strictly greater than the median of the last blocks
pub struct MedianTimePast;

impl Rule for MedianTimePast {
    fn name(&self) -> &'static str {
        "median-time-past"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let median = ctx.lock_points.median_time_past;
        if ctx.header.timestamp <= median {
            return Err(RuleError::violation(self.name(), format!("timestamp {} is not after median time {median}", ctx.header.timestamp)));
        }
        Ok(())
    }
}

/// Timestamp may not run too far ahead of the local clock. The header may
/// become acceptable later, so this never bans.
pub struct FutureTimestamp;

impl Rule for FutureTimestamp {
    fn name(&self) -> &'static str {
        "future-timestamp"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let limit = ctx.now.saturating_add(ctx.params.max_future_block_time);
        if ctx.header.timestamp > limit {
            return Err(RuleError::context_dependent(self.name(), format!("timestamp {} is past {limit}", ctx.header.timestamp)));
        }
        Ok(())
    }
}
