pub mod genesis;
pub mod params;

pub use genesis::{genesis_block, GenesisBlock};
pub use params::{ConsensusAlgorithm, Params};
