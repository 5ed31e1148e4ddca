//! Consensus rules
//!
//! The header and integrity stages, and the first rules of the partial and
//! full stages, are shared by every algorithm. Each algorithm module then
//! appends its own rules.

pub mod full;
pub mod header;
pub mod integrity;
pub mod partial;
pub mod poa;
pub mod pos;
pub mod pow;
pub mod transaction;

use consensus_core::errors::RuleError;

use crate::consensus::validation::{RulePipeline, Stage};

/// Whether a failure can be recorded against the block hash.
///
/// The hash commits to the merkle root but not to the transaction list that
/// claims it, and not to the detached authority signature. A copy failing on
/// those says nothing about other copies under the same hash.
pub fn failure_binds_hash(error: &RuleError) -> bool {
    !matches!(error.rule(), integrity::MERKLE_ROOT | integrity::DUPLICATE_TRANSACTIONS | poa::AUTHORITY_SIGNATURE)
}

pub fn register_common(pipeline: &mut RulePipeline) -> Result<(), String> {
    pipeline.register(Stage::Header, Box::new(header::CheckVersion))?;
    pipeline.register(Stage::Header, Box::new(header::CheckParent))?;
    pipeline.register(Stage::Header, Box::new(header::MedianTimePast))?;
    pipeline.register(Stage::Header, Box::new(header::FutureTimestamp))?;

    // The body must match the header commitment before anything else about it counts
    pipeline.register(Stage::Integrity, Box::new(integrity::MerkleRoot))?;
    pipeline.register(Stage::Integrity, Box::new(integrity::DuplicateTransactions))?;
    pipeline.register(Stage::Integrity, Box::new(integrity::NonEmpty))?;
    pipeline.register(Stage::Integrity, Box::new(integrity::BlockSize))?;
    pipeline.register(Stage::Integrity, Box::new(integrity::CoinbasePlacement))?;
    pipeline.register(Stage::Integrity, Box::new(integrity::TransactionStructure))?;

    pipeline.register(Stage::Partial, Box::new(partial::CoinbaseHeight))?;
    pipeline.register(Stage::Partial, Box::new(partial::TransactionFinality))?;

    pipeline.register(Stage::Full, Box::new(full::CheckSpends))?;
    pipeline.register(Stage::Full, Box::new(full::CoinMaturity))?;
    pipeline.register(Stage::Full, Box::new(full::SequenceLocks))?;
    pipeline.register(Stage::Full, Box::new(full::ScriptVerification))?;
    pipeline.register(Stage::Full, Box::new(full::CheckFees))
}
