//! Block rewards and coinbase helpers

use consensus_core::config::Params;
use consensus_core::tx::{ScriptPublicKey, Transaction, TransactionOutput};

/// Proof-of-work subsidy at `height`, halving every `subsidy_halving_interval` blocks
pub fn calc_block_subsidy(params: &Params, height: u64) -> u64 {
    if params.subsidy_halving_interval == 0 {
        return params.initial_subsidy;
    }
    let halvings = height / params.subsidy_halving_interval;
    if halvings >= 64 {
        0
    } else {
        params.initial_subsidy >> halvings
    }
}

/// Builds a coinbase paying `value` to `script_public_key` at `height`
pub fn create_coinbase(height: u64, value: u64, script_public_key: ScriptPublicKey) -> Transaction {
    Transaction::coinbase(height, vec![TransactionOutput::new(value, script_public_key)])
}

/// Whether the coinbase payload commits to `height`
pub fn commits_to_height(coinbase: &Transaction, height: u64) -> bool {
    coinbase.payload.starts_with(&height.to_le_bytes())
}
