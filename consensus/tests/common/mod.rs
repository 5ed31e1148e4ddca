#![allow(dead_code)]

use std::sync::Arc;

use consensus::pipeline::{fixed_clock, ChainEvent, ConsensusStorage};
use consensus::process::coinbase::calc_block_subsidy;
use consensus::ConsensusManager;
use consensus_core::block::Block;
use consensus_core::config::{genesis_block, ConsensusAlgorithm, Params};
use consensus_core::header::Header;
use consensus_core::tx::{ScriptPublicKey, Transaction, TransactionInput, TransactionOutpoint, TransactionOutput};
use consensus_core::ZERO_HASH;
use tokio::sync::broadcast;

/// Local clock of every test node: well past any timestamp the builders produce
pub fn now(params: &Params) -> u64 {
    params.genesis_timestamp + 10_000_000
}

pub fn pow_params() -> Params {
    let mut params = Params::regtest(ConsensusAlgorithm::ProofOfWork);
    params.coinbase_maturity = 1;
    params
}

pub fn node(params: Params) -> Arc<ConsensusManager> {
    node_with_storage(params, ConsensusStorage::in_memory())
}

pub fn node_with_storage(params: Params, storage: ConsensusStorage) -> Arc<ConsensusManager> {
    let clock = fixed_clock(now(&params));
    Arc::new(ConsensusManager::with_clock(params, storage, clock).unwrap())
}

pub fn genesis_header(params: &Params) -> Header {
    genesis_block(params).block.header
}

/// Proof-of-work block on top of `parent` with a coinbase claiming the full
/// subsidy. `tag` goes into the coinbase payload to tell siblings apart.
pub fn mine_block(params: &Params, parent: &Header, tag: u8, txs: Vec<Transaction>) -> Block {
    let height = parent.height + 1;
    let value = calc_block_subsidy(params, height);
    let mut coinbase = Transaction::coinbase(height, vec![TransactionOutput::new(value, ScriptPublicKey::AnyoneCanSpend)]);
    coinbase.payload.push(tag);

    let mut transactions = vec![coinbase];
    transactions.extend(txs);
    let header = Header::new(parent.hash(), ZERO_HASH, parent.timestamp + params.target_spacing, parent.bits, 0, height);
    let mut block = Block::with_committed_root(header, transactions);
    assert!(consensus_pow::solve(&mut block.header, params.pow_limit_bits, 10_000).unwrap());
    block
}

/// Mines and submits `count` blocks on top of `parent`, returning them in order
pub fn extend(manager: &ConsensusManager, parent: &Header, count: usize, tag: u8) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(count);
    let mut parent = parent.clone();
    for _ in 0..count {
        let block = mine_block(manager.params(), &parent, tag, Vec::new());
        manager.submit_block(block.clone()).unwrap();
        parent = block.header.clone();
        blocks.push(block);
    }
    blocks
}

pub fn coinbase_outpoint(block: &Block) -> TransactionOutpoint {
    TransactionOutpoint::new(block.transactions[0].id(), 0)
}

/// Spends `outpoints` into a single anyone-can-spend output of `value`
pub fn spend(outpoints: &[TransactionOutpoint], value: u64) -> Transaction {
    let inputs = outpoints.iter().map(|outpoint| TransactionInput::unsigned(*outpoint)).collect();
    Transaction::new(1, inputs, vec![TransactionOutput::new(value, ScriptPublicKey::AnyoneCanSpend)], 0, Vec::new())
}

pub fn drain(rx: &mut broadcast::Receiver<ChainEvent>) -> Vec<ChainEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
