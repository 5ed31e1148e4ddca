//! Past median time
//!
//! Median timestamp of the last [`MEDIAN_TIME_SPAN`] blocks of a chain, used
//! as the lower timestamp bound for a child block and as the time against
//! which time-based lock times are evaluated.

use std::sync::Arc;

use consensus_core::constants::MEDIAN_TIME_SPAN;

use crate::consensus::tree::ChainedHeader;

/// Median of the given timestamps. An empty window yields zero.
pub fn median_timestamp(mut timestamps: Vec<u64>) -> u64 {
    if timestamps.is_empty() {
        return 0;
    }
    timestamps.sort_unstable();
    timestamps[timestamps.len() / 2]
}

/// Past median time of the chain ending at `ancestry[0]`. `ancestry` lists
/// the tip first followed by its ancestors; only the first
/// [`MEDIAN_TIME_SPAN`] entries are considered.
pub fn past_median_time(ancestry: &[Arc<ChainedHeader>]) -> u64 {
    median_timestamp(ancestry.iter().take(MEDIAN_TIME_SPAN).map(|node| node.timestamp()).collect())
}
