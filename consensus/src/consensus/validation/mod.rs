//! Staged block validation
//!
//! Blocks move through four stages: header, integrity, partial and full.
//! Each stage is an ordered [`RuleSet`]; the algorithm-specific rule lists
//! plug into the same stages.

pub mod context;
pub mod engine;
pub mod rule;
pub mod state;

pub use context::{ChainContext, LockPoints, RuleContext, TxLockPoints};
pub use engine::RulePipeline;
pub use rule::{Rule, RuleSet};
pub use state::{Outcome, Stage, ValidationState};
