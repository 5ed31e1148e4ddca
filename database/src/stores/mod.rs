pub mod block_store;
pub mod header_store;
pub mod memory_store;
pub mod utxo_store;

pub use block_store::BlockStore;
pub use header_store::HeaderStore;
pub use memory_store::MemoryCoinStore;
pub use utxo_store::{CoinBatch, CoinStore, UtxoStore};
