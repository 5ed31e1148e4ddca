//! Chain-state engine: the header tree, the coin view and the staged rule
//! pipeline with its per-algorithm rule sets.

pub mod rules;
pub mod storage;
pub mod tree;
pub mod validation;

pub use storage::{BlockStore, CoinSource, CoinView, CoinViewError, FetchCoinsResponse};
pub use tree::{BlockStatus, ChainedHeader, HeaderTree};
pub use validation::{RuleContext, RulePipeline, Stage, ValidationState};
