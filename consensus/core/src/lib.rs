//! Consensus primitives shared by every crate of the node: headers, blocks,
//! transactions, UTXO entries, network parameters and the error taxonomy.

pub mod block;
pub mod config;
pub mod constants;
pub mod errors;
pub mod hashing;
pub mod header;
pub mod merkle;
pub mod sign;
pub mod tx;
pub mod utxo;

pub use crypto_hashes::Hash;

/// Cumulative chain work / per-header work.
pub type ChainWork = primitive_types::U256;

pub const ZERO_HASH: Hash = Hash::zeroed();
