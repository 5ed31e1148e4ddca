//! Per-attempt validation scratch state

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use consensus_core::block::Block;
use consensus_core::config::{ConsensusAlgorithm, Params};
use consensus_core::constants::MEDIAN_TIME_SPAN;
use consensus_core::header::Header;
use consensus_core::tx::{Transaction, TransactionOutpoint, UtxoEntry, COINSTAKE_TRANSACTION_INDEX};
use consensus_core::utxo::UtxoDiff;
use consensus_core::Hash;

use super::state::ValidationState;
use crate::consensus::storage::{CoinSource, CoinViewError};
use crate::consensus::tree::{ChainedHeader, HeaderTree};
use crate::process::past_median_time::past_median_time;

/// Chain context a candidate extends, captured from the header tree
#[derive(Debug, Clone)]
pub struct ChainContext {
    pub prev: Arc<ChainedHeader>,
    /// `prev` followed by up to `MEDIAN_TIME_SPAN - 1` of its ancestors
    pub ancestry: Vec<Arc<ChainedHeader>>,
    /// First block of the difficulty window closed by the candidate, only
    /// captured when the candidate sits on a retarget boundary
    pub window_start: Option<Arc<ChainedHeader>>,
}

impl ChainContext {
    pub fn from_tree(tree: &HeaderTree, prev: Arc<ChainedHeader>, params: &Params) -> Self {
        let ancestry = tree.ancestry(&prev.hash, MEDIAN_TIME_SPAN);
        let height = prev.height + 1;
        let window_start = if params.retarget_interval > 0 && height % params.retarget_interval == 0 {
            tree.ancestor_at(&prev, height - params.retarget_interval)
        } else {
            None
        };
        Self { prev, ancestry, window_start }
    }

    pub fn median_time_past(&self) -> u64 {
        past_median_time(&self.ancestry)
    }
}

/// Height and time a transaction is evaluated against
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockPoints {
    pub height: u64,
    pub median_time_past: u64,
}

/// Per-transaction lock bookkeeping filled in by the full stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxLockPoints {
    /// Lowest block height at which every relative lock of the transaction is satisfied
    pub min_height: u64,
}

pub struct RuleContext<'a> {
    pub params: &'a Params,
    pub header: &'a Header,
    pub hash: Hash,
    block: Option<&'a Block>,
    pub chain: ChainContext,
    /// Local clock, seconds since the unix epoch
    pub now: u64,
    pub lock_points: LockPoints,
    pub tx_lock_points: Vec<TxLockPoints>,
    coin_source: Option<&'a dyn CoinSource>,
    /// Coins loaded from the coin source, keyed by the outpoints the block spends
    pub coins: HashMap<TransactionOutpoint, Option<UtxoEntry>>,
    /// Spent entries per transaction index, empty for the coinbase
    pub input_coins: Vec<Vec<UtxoEntry>>,
    pub fees: u64,
    pub diff: UtxoDiff,
    pub state: ValidationState,
}

impl<'a> RuleContext<'a> {
    pub fn for_header(params: &'a Params, header: &'a Header, chain: ChainContext, now: u64) -> Self {
        let lock_points = LockPoints { height: header.height, median_time_past: chain.median_time_past() };
        Self {
            params,
            header,
            hash: header.hash(),
            block: None,
            chain,
            now,
            lock_points,
            tx_lock_points: Vec::new(),
            coin_source: None,
            coins: HashMap::new(),
            input_coins: Vec::new(),
            fees: 0,
            diff: UtxoDiff::new(),
            state: ValidationState::Received,
        }
    }

    pub fn for_block(params: &'a Params, block: &'a Block, chain: ChainContext, now: u64) -> Self {
        let mut ctx = Self::for_header(params, &block.header, chain, now);
        ctx.block = Some(block);
        ctx
    }

    /// Attaches the coin source the full stage reads spent outputs from
    pub fn with_coin_source(mut self, source: &'a dyn CoinSource) -> Self {
        self.coin_source = Some(source);
        self
    }

    /// Starts at a later state, for blocks whose earlier stages already passed
    pub fn with_state(mut self, state: ValidationState) -> Self {
        self.state = state;
        self
    }

    pub fn has_body(&self) -> bool {
        self.block.is_some()
    }

    pub fn block(&self) -> Option<&'a Block> {
        self.block
    }

    /// Transactions of the candidate, empty for a header-only attempt
    pub fn transactions(&self) -> &'a [Transaction] {
        self.block.map(|block| block.transactions.as_slice()).unwrap_or(&[])
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Whether the candidate must be produced by staking
    pub fn is_stake_height(&self) -> bool {
        self.params.algorithm == ConsensusAlgorithm::ProofOfStake && self.height() > self.params.last_pow_height
    }

    /// Index of the coinstake when the candidate is a proof-of-stake block
    pub fn coinstake_index(&self) -> Option<usize> {
        let txs = self.transactions();
        (self.is_stake_height() && txs.get(COINSTAKE_TRANSACTION_INDEX).is_some_and(Transaction::is_coinstake))
            .then_some(COINSTAKE_TRANSACTION_INDEX)
    }

    /// Reads every outpoint spent by the candidate from the coin source in one
    /// request. Outputs created inside the block come back as not found; the
    /// spend check resolves those itself.
    ///
    /// The source must be at the candidate's parent. A read taken at any other
    /// tip fails with `ConcurrentModification` rather than as a rule failure,
    /// since it says nothing about the candidate.
    pub fn load_coins(&mut self) -> Result<(), CoinViewError> {
        let outpoints: HashSet<TransactionOutpoint> = self
            .transactions()
            .iter()
            .filter(|tx| !tx.is_coinbase())
            .flat_map(|tx| tx.inputs.iter().map(|input| input.previous_outpoint))
            .collect();
        match self.coin_source {
            Some(source) => {
                let response = source.fetch_coins(&outpoints)?;
                if response.tip != self.chain.prev.hash {
                    return Err(CoinViewError::ConcurrentModification { expected: self.chain.prev.hash, actual: response.tip });
                }
                self.coins = response.coins;
            }
            None => {
                self.coins = outpoints.into_iter().map(|outpoint| (outpoint, None)).collect();
            }
        }
        Ok(())
    }
}
