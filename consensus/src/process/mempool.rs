//! Mempool admission
//!
//! Pending transactions are checked with the same per-transaction rules as
//! block transactions, against a coin view that layers the outputs of
//! pending transactions over the committed coin view. A transaction may
//! therefore spend outputs of other pending transactions, but never an
//! output another pending transaction already spends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::errors::{RuleError, RuleResult};
use consensus_core::tx::{Transaction, TransactionId, TransactionOutpoint, UtxoEntry};
use consensus_core::Hash;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::consensus::rules::transaction::{calc_fee, check_finality, check_maturity, check_scripts, check_sequence_locks, check_transaction_structure};
use crate::consensus::storage::{CoinSource, CoinViewError, FetchCoinsResponse};
use crate::consensus::validation::LockPoints;
use crate::pipeline::{ChainEvent, ConsensusManager};

const MEMPOOL_RULE: &str = "mempool";
/// Coin reads taken while the chain moves are retried this many times
const TIP_READ_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum MempoolError {
    #[error(transparent)]
    Rule(#[from] RuleError),

    #[error("mempool is full ({0} transactions)")]
    Full(usize),

    #[error("coin view: {0}")]
    CoinView(#[from] CoinViewError),

    #[error("chain is being updated: active tip {active}, coin view at {coin_view}")]
    ChainUpdating { active: Hash, coin_view: Hash },
}

impl MempoolError {
    /// Benign rejections callers treat as success
    pub fn is_already_known(&self) -> bool {
        matches!(self, MempoolError::Rule(RuleError::AlreadyKnown(_)))
    }
}

#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    pub fee: u64,
    /// Arrival order
    pub seq: u64,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<TransactionId, MempoolEntry>,
    /// Outpoints consumed by pending transactions
    spent_by: HashMap<TransactionOutpoint, TransactionId>,
    /// Spendable outputs created by pending transactions
    outputs: HashMap<TransactionOutpoint, UtxoEntry>,
    next_seq: u64,
}

impl PoolState {
    /// Removes `id` and every pending transaction spending its outputs
    fn remove_with_descendants(&mut self, id: TransactionId) -> usize {
        let mut removed = 0;
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            let Some(entry) = self.entries.remove(&id) else { continue };
            removed += 1;
            for input in &entry.tx.inputs {
                self.spent_by.remove(&input.previous_outpoint);
            }
            for index in 0..entry.tx.outputs.len() {
                let outpoint = TransactionOutpoint::new(id, index as u32);
                self.outputs.remove(&outpoint);
                if let Some(child) = self.spent_by.get(&outpoint) {
                    stack.push(*child);
                }
            }
        }
        removed
    }

    /// Drops a transaction that was confirmed; its descendants stay
    fn remove_confirmed(&mut self, id: &TransactionId) -> bool {
        let Some(entry) = self.entries.remove(id) else { return false };
        for input in &entry.tx.inputs {
            self.spent_by.remove(&input.previous_outpoint);
        }
        for index in 0..entry.tx.outputs.len() {
            self.outputs.remove(&TransactionOutpoint::new(*id, index as u32));
        }
        true
    }
}

/// Committed coins with pending outputs layered on top. Outputs already
/// spent by a pending transaction read as not found.
struct PendingCoinView<'a> {
    base: &'a dyn CoinSource,
    pool: &'a PoolState,
}

impl CoinSource for PendingCoinView<'_> {
    fn fetch_coins(&self, outpoints: &HashSet<TransactionOutpoint>) -> Result<FetchCoinsResponse, CoinViewError> {
        let missing: HashSet<TransactionOutpoint> = outpoints.iter().filter(|outpoint| !self.pool.outputs.contains_key(outpoint)).copied().collect();
        let mut response = self.base.fetch_coins(&missing)?;
        for outpoint in outpoints {
            if let Some(entry) = self.pool.outputs.get(outpoint) {
                response.coins.insert(*outpoint, Some(entry.clone()));
            }
            if self.pool.spent_by.contains_key(outpoint) {
                response.coins.insert(*outpoint, None);
            }
        }
        Ok(response)
    }
}

pub struct Mempool {
    consensus: Arc<ConsensusManager>,
    state: RwLock<PoolState>,
    max_transactions: usize,
}

impl Mempool {
    pub fn new(consensus: Arc<ConsensusManager>) -> Self {
        let max_transactions = consensus.params().mempool_max_transactions;
        Self { consensus, state: RwLock::new(PoolState::default()), max_transactions }
    }

    /// Validates `tx` against the active chain plus pending transactions and
    /// adds it to the pool. Returns the fee it pays.
    pub fn add_transaction(&self, tx: Transaction) -> Result<u64, MempoolError> {
        let id = tx.id();
        if self.state.read().entries.contains_key(&id) {
            return Err(RuleError::AlreadyKnown(id).into());
        }
        if tx.is_coinbase() {
            return Err(RuleError::structural(MEMPOOL_RULE, "coinbase transactions are only valid in blocks").into());
        }
        let params = self.consensus.params();
        check_transaction_structure(&tx, params)?;

        let mut state = self.state.write();
        if state.entries.contains_key(&id) {
            return Err(RuleError::AlreadyKnown(id).into());
        }
        if state.entries.len() >= self.max_transactions {
            return Err(MempoolError::Full(self.max_transactions));
        }

        let outpoints: HashSet<TransactionOutpoint> = tx.inputs.iter().map(|input| input.previous_outpoint).collect();
        let (lock_points, response) = self.read_inputs(&state, &outpoints)?;
        check_finality(&tx, &lock_points)?;
        let coins = tx
            .inputs
            .iter()
            .map(|input| response.get(&input.previous_outpoint).cloned().ok_or_else(|| RuleError::missing_input(MEMPOOL_RULE, input.previous_outpoint)))
            .collect::<RuleResult<Vec<_>>>()?;

        check_maturity(&tx, &coins, lock_points.height, params.coinbase_maturity)?;
        check_sequence_locks(&tx, &coins, lock_points.height)?;
        check_scripts(&tx, &coins)?;
        let fee = calc_fee(&tx, &coins)?;

        for input in &tx.inputs {
            state.spent_by.insert(input.previous_outpoint, id);
        }
        for (index, output) in tx.outputs.iter().enumerate() {
            if !output.script_public_key.is_unspendable() {
                let entry = UtxoEntry::new(output.value, output.script_public_key.clone(), lock_points.height, false);
                state.outputs.insert(TransactionOutpoint::new(id, index as u32), entry);
            }
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.insert(id, MempoolEntry { tx: Arc::new(tx), fee, seq });
        tracing::debug!("accepted transaction {} into the mempool (fee {})", id, fee);
        Ok(fee)
    }

    /// Reads `outpoints` together with the lock points of the block after the
    /// active tip. The read is only used when the coin view sits at that tip;
    /// otherwise a chain update is in flight and the read is taken again.
    fn read_inputs(&self, pool: &PoolState, outpoints: &HashSet<TransactionOutpoint>) -> Result<(LockPoints, FetchCoinsResponse), MempoolError> {
        let view = PendingCoinView { base: self.consensus.coin_view().as_ref(), pool };
        let mut attempts = 0;
        loop {
            let tip = self.consensus.get_best_tip();
            let response = view.fetch_coins(outpoints)?;
            if response.tip == tip.hash {
                return Ok((self.consensus.lock_points_after(&tip), response));
            }
            attempts += 1;
            if attempts == TIP_READ_ATTEMPTS {
                return Err(MempoolError::ChainUpdating { active: tip.hash, coin_view: response.tip });
            }
            std::thread::yield_now();
        }
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.state.read().entries.contains_key(id)
    }

    pub fn get(&self, id: &TransactionId) -> Option<MempoolEntry> {
        self.state.read().entries.get(id).cloned()
    }

    /// Pending transactions in arrival order
    pub fn transactions(&self) -> Vec<Arc<Transaction>> {
        let state = self.state.read();
        let mut entries: Vec<&MempoolEntry> = state.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries.into_iter().map(|entry| entry.tx.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove_transaction(&self, id: &TransactionId) -> usize {
        self.state.write().remove_with_descendants(*id)
    }

    /// Drops transactions confirmed by `block` and those conflicting with it
    pub fn remove_for_block(&self, block: &Block) {
        let mut state = self.state.write();
        let mut conflicts = 0;
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            let id = tx.id();
            state.remove_confirmed(&id);
            for input in &tx.inputs {
                if let Some(other) = state.spent_by.get(&input.previous_outpoint).copied() {
                    if other != id {
                        conflicts += state.remove_with_descendants(other);
                    }
                }
            }
        }
        if conflicts > 0 {
            tracing::debug!("block {} evicted {} conflicting mempool transactions", block.hash(), conflicts);
        }
    }

    /// Drops transactions that spend outputs of a disconnected block.
    /// The block's own transactions are not resurrected.
    pub fn remove_for_disconnected(&self, block: &Block) {
        let mut state = self.state.write();
        for tx in &block.transactions {
            let id = tx.id();
            for index in 0..tx.outputs.len() {
                if let Some(child) = state.spent_by.get(&TransactionOutpoint::new(id, index as u32)).copied() {
                    state.remove_with_descendants(child);
                }
            }
        }
    }

    pub fn handle_event(&self, event: &ChainEvent) {
        match event {
            ChainEvent::BlockConnected { block, .. } => self.remove_for_block(block),
            ChainEvent::BlockDisconnected { block, .. } => self.remove_for_disconnected(block),
        }
    }

    /// Applies chain events until the channel closes
    pub async fn follow_chain(&self, mut events: broadcast::Receiver<ChainEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => tracing::warn!("mempool missed {} chain events", skipped),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
