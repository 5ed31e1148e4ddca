use crate::stores::{CoinBatch, CoinStore};
use crate::{DbError, DbResult};
use consensus_core::tx::{TransactionOutpoint, UtxoEntry};
use consensus_core::utxo::{UndoRecord, UtxoCollection};
use consensus_core::Hash;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

#[derive(Default)]
struct StoredCoins {
    coins: UtxoCollection,
    tip: Option<Hash>,
    undo: BTreeMap<u64, UndoRecord>,
}

/// In-memory coin store for tests and ephemeral nodes
#[derive(Default)]
pub struct MemoryCoinStore {
    state: RwLock<StoredCoins>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCoinStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `batch_write` fail, simulating a broken disk
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful batch writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.state.read().coins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CoinStore for MemoryCoinStore {
    fn get(&self, outpoint: &TransactionOutpoint) -> DbResult<Option<UtxoEntry>> {
        Ok(self.state.read().coins.get(outpoint).cloned())
    }

    fn tip(&self) -> DbResult<Option<Hash>> {
        Ok(self.state.read().tip)
    }

    fn batch_write(&self, batch: CoinBatch<'_>) -> DbResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::WriteRejected("memory store configured to fail".to_string()));
        }
        let mut state = self.state.write();
        for outpoint in &batch.removals {
            state.coins.remove(outpoint);
        }
        for (outpoint, entry) in batch.insertions {
            state.coins.insert(outpoint, entry);
        }
        if let Some(range) = batch.undo_range {
            state.undo.retain(|seq, _| range.contains(seq));
        }
        for record in batch.undo_writes {
            state.undo.insert(record.seq, record.clone());
        }
        state.tip = Some(batch.tip);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn undo_log(&self) -> DbResult<Vec<UndoRecord>> {
        Ok(self.state.read().undo.values().cloned().collect())
    }

    fn snapshot(&self) -> DbResult<UtxoCollection> {
        Ok(self.state.read().coins.clone())
    }
}
