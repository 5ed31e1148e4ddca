use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::tx::{TransactionOutpoint, UtxoEntry};

/// The effect of connecting one block on the coin view.
/// `spent` keeps the consumed entries so the change can be undone;
/// outputs created and spent within the same block appear in neither list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtxoDiff {
    pub spent: Vec<(TransactionOutpoint, UtxoEntry)>,
    pub created: Vec<(TransactionOutpoint, UtxoEntry)>,
    /// Position of each created outpoint in `created`; rebuilt after decoding
    #[serde(skip)]
    created_index: HashMap<TransactionOutpoint, usize>,
}

impl PartialEq for UtxoDiff {
    fn eq(&self, other: &Self) -> bool {
        self.spent == other.spent && self.created == other.created
    }
}

impl Eq for UtxoDiff {}

impl UtxoDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.spent.is_empty() && self.created.is_empty()
    }

    /// Records the consumption of `outpoint`. An output created earlier in the
    /// same diff is cancelled out instead.
    pub fn spend(&mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) {
        if self.created_index.len() != self.created.len() {
            self.reindex();
        }
        match self.created_index.remove(&outpoint) {
            Some(pos) => {
                self.created.swap_remove(pos);
                if let Some((moved, _)) = self.created.get(pos) {
                    self.created_index.insert(*moved, pos);
                }
            }
            None => self.spent.push((outpoint, entry)),
        }
    }

    pub fn create(&mut self, outpoint: TransactionOutpoint, entry: UtxoEntry) {
        if self.created_index.len() != self.created.len() {
            self.reindex();
        }
        self.created_index.insert(outpoint, self.created.len());
        self.created.push((outpoint, entry));
    }

    fn reindex(&mut self) {
        self.created_index = self.created.iter().enumerate().map(|(pos, (outpoint, _))| (*outpoint, pos)).collect();
    }

    pub fn spent_outpoints(&self) -> impl Iterator<Item = &TransactionOutpoint> {
        self.spent.iter().map(|(outpoint, _)| outpoint)
    }

    pub fn created_map(&self) -> HashMap<TransactionOutpoint, UtxoEntry> {
        self.created.iter().cloned().collect()
    }
}
