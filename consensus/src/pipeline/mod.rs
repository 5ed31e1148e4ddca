//! Block processing pipeline
//!
//! Headers go through the [`HeaderProcessor`], bodies through the
//! [`BodyProcessor`], and the [`ChainSelector`] connects validated blocks.
//! The [`ConsensusManager`] ties them together.

pub mod body_processor;
pub mod consensus_manager;
pub mod deps_manager;
pub mod header_processor;
pub mod notify;
pub mod reorg;

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub use body_processor::BodyProcessor;
pub use consensus_manager::{ConsensusManager, ConsensusStorage, SubmitOutcome};
pub use deps_manager::DepsManager;
pub use header_processor::HeaderProcessor;
pub use notify::{ChainEvent, EventBus};
pub use reorg::{ActivationOutcome, ChainSelector};

/// Source of the local time in unix seconds
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(|| SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default())
}

/// A clock stuck at `now`, for tests and replays
pub fn fixed_clock(now: u64) -> Clock {
    Arc::new(move || now)
}
