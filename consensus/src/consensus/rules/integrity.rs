//! Context-free block structure

use std::collections::HashSet;

use consensus_core::errors::{RuleError, RuleResult};

use super::transaction::check_transaction_structure;
use crate::consensus::validation::{Rule, RuleContext};

pub const MERKLE_ROOT: &str = "merkle-root";
pub const DUPLICATE_TRANSACTIONS: &str = "duplicate-transactions";

pub struct NonEmpty;

impl Rule for NonEmpty {
    fn name(&self) -> &'static str {
        "block-non-empty"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        if ctx.transactions().is_empty() {
            return Err(RuleError::structural(self.name(), "block has no transactions"));
        }
        Ok(())
    }
}

pub struct BlockSize;

impl Rule for BlockSize {
    fn name(&self) -> &'static str {
        "block-size"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let size = ctx.block().map(|block| block.serialized_size()).unwrap_or_default();
        if size > ctx.params.max_block_size {
            return Err(RuleError::structural(self.name(), format!("{size} bytes exceeds {}", ctx.params.max_block_size)));
        }
        Ok(())
    }
}

pub struct MerkleRoot;

impl Rule for MerkleRoot {
    fn name(&self) -> &'static str {
        MERKLE_ROOT
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let Some(block) = ctx.block() else {
            return Ok(());
        };
        let calculated = block.calculate_merkle_root();
        if calculated != ctx.header.hash_merkle_root {
            return Err(RuleError::structural(self.name(), format!("header commits {}, transactions hash to {calculated}", ctx.header.hash_merkle_root)));
        }
        Ok(())
    }
}

pub struct DuplicateTransactions;

impl Rule for DuplicateTransactions {
    fn name(&self) -> &'static str {
        DUPLICATE_TRANSACTIONS
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let mut seen = HashSet::with_capacity(ctx.transactions().len());
        for tx in ctx.transactions() {
            let id = tx.id();
            if !seen.insert(id) {
                return Err(RuleError::structural(self.name(), format!("transaction {id} appears twice")));
            }
        }
        Ok(())
    }
}

/// The first transaction is the coinbase and no other transaction is one
pub struct CoinbasePlacement;

impl Rule for CoinbasePlacement {
    fn name(&self) -> &'static str {
        "coinbase-placement"
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        let txs = ctx.transactions();
        if !txs.first().is_some_and(|tx| tx.is_coinbase()) {
            return Err(RuleError::structural(self.name(), "first transaction is not a coinbase"));
        }
        if let Some(index) = txs.iter().skip(1).position(|tx| tx.is_coinbase()) {
            return Err(RuleError::structural(self.name(), format!("second coinbase at index {}", index + 1)));
        }
        Ok(())
    }
}

pub struct TransactionStructure;

impl Rule for TransactionStructure {
    fn name(&self) -> &'static str {
        super::transaction::TX_STRUCTURE
    }

    fn validate(&self, ctx: &mut RuleContext<'_>) -> RuleResult<()> {
        ctx.transactions().iter().try_for_each(|tx| check_transaction_structure(tx, ctx.params))
    }
}
