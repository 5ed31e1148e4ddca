use std::collections::HashMap;

use thiserror::Error;

use crate::tx::{TransactionOutpoint, UtxoEntry};
use crate::utxo::UtxoDiff;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    #[error("outpoint {0} is not in the set")]
    Missing(TransactionOutpoint),

    #[error("outpoint {0} already exists")]
    Exists(TransactionOutpoint),
}

/// Plain in-memory UTXO set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoCollection {
    utxos: HashMap<TransactionOutpoint, UtxoEntry>,
}

impl UtxoCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, outpoint: &TransactionOutpoint) -> bool {
        self.utxos.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &TransactionOutpoint) -> Option<&UtxoEntry> {
        self.utxos.get(outpoint)
    }

    pub fn insert(&mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) -> Option<UtxoEntry> {
        self.utxos.insert(outpoint, entry)
    }

    pub fn remove(&mut self, outpoint: &TransactionOutpoint) -> Option<UtxoEntry> {
        self.utxos.remove(outpoint)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TransactionOutpoint, &UtxoEntry)> {
        self.utxos.iter()
    }

    /// Sum of all amounts
    pub fn total_supply(&self) -> u128 {
        self.utxos.values().map(|e| e.amount as u128).sum()
    }

    /// Applies `diff`, leaving the set untouched on error
    pub fn apply_diff(&mut self, diff: &UtxoDiff) -> Result<(), UtxoError> {
        if let Some((outpoint, _)) = diff.spent.iter().find(|(outpoint, _)| !self.contains(outpoint)) {
            return Err(UtxoError::Missing(*outpoint));
        }
        if let Some((outpoint, _)) = diff.created.iter().find(|(outpoint, _)| self.contains(outpoint)) {
            return Err(UtxoError::Exists(*outpoint));
        }
        for (outpoint, _) in &diff.spent {
            self.utxos.remove(outpoint);
        }
        for (outpoint, entry) in &diff.created {
            self.utxos.insert(*outpoint, entry.clone());
        }
        Ok(())
    }

    /// Reverses a previously applied `diff`
    pub fn undo_diff(&mut self, diff: &UtxoDiff) {
        for (outpoint, _) in &diff.created {
            self.utxos.remove(outpoint);
        }
        for (outpoint, entry) in &diff.spent {
            self.utxos.insert(*outpoint, entry.clone());
        }
    }
}

impl FromIterator<(TransactionOutpoint, UtxoEntry)> for UtxoCollection {
    fn from_iter<I: IntoIterator<Item = (TransactionOutpoint, UtxoEntry)>>(iter: I) -> Self {
        Self { utxos: iter.into_iter().collect() }
    }
}
