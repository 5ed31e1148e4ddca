//! chaind - chain-state node daemon
//!
//! Wires storage, the consensus manager and the mempool together, logs chain
//! events and imports blocks from JSON lines files.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod ui;

pub use cli::Args;
pub use config::Config;
pub use daemon::{Daemon, ImportSummary};
