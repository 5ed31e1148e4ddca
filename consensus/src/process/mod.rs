//! Processes built on top of the consensus engine

pub mod coinbase;
pub mod mempool;
pub mod past_median_time;

pub use mempool::{Mempool, MempoolEntry, MempoolError};
