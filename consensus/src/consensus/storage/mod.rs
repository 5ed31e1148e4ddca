//! Storage module for consensus
//!
//! The coin view over the UTXO backing store and the block body store.

pub mod block_store;
pub mod coin_view;

pub use block_store::BlockStore;
pub use coin_view::{CoinSource, CoinView, CoinViewError, FetchCoinsResponse};
