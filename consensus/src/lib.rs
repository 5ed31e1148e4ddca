//! Consensus validation and chain-state engine
//!
//! Tracks every candidate chain of headers in a tree, validates blocks through
//! a staged rule pipeline shared by proof of work, proof of stake and proof
//! of authority, and maintains the UTXO set of the active chain.

pub mod consensus;
pub mod pipeline;
pub mod process;

// Re-export key types for easier access
pub use consensus::rules;
pub use consensus::storage::{BlockStore, CoinSource, CoinView, CoinViewError, FetchCoinsResponse};
pub use consensus::tree::{BlockStatus, ChainedHeader, HeaderTree};
pub use consensus::validation::{ChainContext, LockPoints, Outcome, Rule, RuleContext, RulePipeline, Stage, ValidationState};
pub use consensus_core::Hash;

pub use pipeline::{ChainEvent, ConsensusManager, ConsensusStorage, EventBus, SubmitOutcome};
pub use process::{Mempool, MempoolError};
