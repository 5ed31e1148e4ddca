//! Coin view
//!
//! The UTXO set as of one chain tip: a write-back LRU cache layered over a
//! persistent [`CoinStore`], plus a bounded undo log of applied changesets.
//! The undo log is written back with the coins, so a reopened view can still
//! rewind as far as it could before.
//!
//! Lock order is always `state` then `cache`. Readers hold `state` shared for
//! the whole lookup, so they observe a changeset entirely or not at all.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::Range;
use std::sync::Arc;

use consensus_core::errors::ConsensusError;
use consensus_core::tx::{TransactionOutpoint, UtxoEntry};
use consensus_core::utxo::{UndoRecord, UtxoCollection};
use consensus_core::Hash;
use database::cache::{CacheEntry, WriteBackCache};
use database::stores::{CoinBatch, CoinStore};
use database::DbError;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoinViewError {
    #[error("coin view tip is {actual}, caller expected {expected}")]
    ConcurrentModification { expected: Hash, actual: Hash },

    #[error("no changeset left to rewind")]
    RewindLimitExceeded,

    #[error("spent coin {0} is not in the view")]
    MissingCoin(TransactionOutpoint),

    #[error("created coin {0} already exists")]
    CoinOverwrite(TransactionOutpoint),

    #[error("backing store: {0}")]
    Store(#[from] DbError),
}

impl From<CoinViewError> for ConsensusError {
    fn from(err: CoinViewError) -> Self {
        match err {
            CoinViewError::ConcurrentModification { expected, actual } => ConsensusError::ConcurrentModification { expected, actual },
            CoinViewError::RewindLimitExceeded => ConsensusError::RewindLimitExceeded,
            // A changeset that does not fit the view means the view is corrupted
            other => ConsensusError::Storage(other.to_string()),
        }
    }
}

/// Result of a coin lookup together with the tip it was taken at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCoinsResponse {
    pub tip: Hash,
    pub coins: HashMap<TransactionOutpoint, Option<UtxoEntry>>,
}

impl FetchCoinsResponse {
    pub fn get(&self, outpoint: &TransactionOutpoint) -> Option<&UtxoEntry> {
        self.coins.get(outpoint).and_then(Option::as_ref)
    }

    pub fn found(&self) -> impl Iterator<Item = (&TransactionOutpoint, &UtxoEntry)> {
        self.coins.iter().filter_map(|(outpoint, entry)| entry.as_ref().map(|entry| (outpoint, entry)))
    }
}

/// Read access to a set of unspent outputs
pub trait CoinSource: Send + Sync {
    fn fetch_coins(&self, outpoints: &HashSet<TransactionOutpoint>) -> Result<FetchCoinsResponse, CoinViewError>;
}

struct ViewState {
    tip: Hash,
    /// Applied changesets, oldest first, with consecutive sequence numbers
    undo: VecDeque<UndoRecord>,
    next_seq: u64,
}

impl ViewState {
    fn undo_range(&self) -> Range<u64> {
        self.undo.front().map_or(self.next_seq, |record| record.seq)..self.next_seq
    }
}

struct CacheState {
    coins: WriteBackCache<TransactionOutpoint, UtxoEntry>,
    /// Undo records below this sequence number are stored as they are in memory
    undo_synced: u64,
}

/// Cache slots captured before a write, in write order
type Slots = Vec<(TransactionOutpoint, Option<CacheEntry<UtxoEntry>>)>;

pub struct CoinView {
    store: Arc<dyn CoinStore>,
    state: RwLock<ViewState>,
    cache: Mutex<CacheState>,
    undo_depth: usize,
}

impl CoinView {
    /// Opens the view at the store's persisted tip, or at `genesis` for a
    /// fresh store, together with the persisted undo log
    pub fn new(store: Arc<dyn CoinStore>, genesis: Hash, undo_depth: usize, cache_max_entries: usize, cache_max_bytes: usize) -> Result<Self, CoinViewError> {
        let undo_depth = undo_depth.max(1);
        let tip = store.tip()?.unwrap_or(genesis);
        let mut undo: VecDeque<UndoRecord> = store.undo_log()?.into();
        if let Some(last) = undo.back().filter(|last| last.tip_after != tip) {
            tracing::warn!("stored undo log ends at {} instead of the coin tip {}, discarding it", last.tip_after, tip);
            undo.clear();
        }
        while undo.len() > undo_depth {
            undo.pop_front();
        }
        let next_seq = undo.back().map_or(0, |record| record.seq + 1);
        tracing::debug!("coin view opened at tip {} with {} undo records", tip, undo.len());

        Ok(Self {
            store,
            state: RwLock::new(ViewState { tip, undo, next_seq }),
            cache: Mutex::new(CacheState { coins: WriteBackCache::new(cache_max_entries, cache_max_bytes), undo_synced: next_seq }),
            undo_depth,
        })
    }

    pub fn tip(&self) -> Hash {
        self.state.read().tip
    }

    /// Number of changesets that can currently be rewound
    pub fn undo_len(&self) -> usize {
        self.state.read().undo.len()
    }

    fn lookup(&self, coins: &mut WriteBackCache<TransactionOutpoint, UtxoEntry>, outpoint: &TransactionOutpoint) -> Result<Option<UtxoEntry>, CoinViewError> {
        if let Some(cached) = coins.get(outpoint) {
            return Ok(cached);
        }
        let entry = self.store.get(outpoint)?;
        coins.insert_clean(*outpoint, entry.clone());
        Ok(entry)
    }

    fn shrink_cache(&self, state: &ViewState, cache: &mut CacheState) -> Result<(), CoinViewError> {
        let CacheState { coins, undo_synced } = cache;
        let store = self.store.as_ref();
        let evicted = coins.shrink(|dirty| write_back(store, state, undo_synced, dirty))?;
        if evicted > 0 {
            tracing::trace!("coin cache evicted {} entries", evicted);
        }
        Ok(())
    }

    /// Applies a block's changeset, moving the tip from `tip_before` to `tip_after`.
    /// Nothing changes unless every spent coin exists, no created coin does
    /// and any write-back the cache needs succeeds.
    pub fn save_changes(
        &self,
        tip_before: Hash,
        tip_after: Hash,
        spent: &[TransactionOutpoint],
        created: &[(TransactionOutpoint, UtxoEntry)],
    ) -> Result<(), CoinViewError> {
        let mut state = self.state.write();
        if state.tip != tip_before {
            return Err(CoinViewError::ConcurrentModification { expected: tip_before, actual: state.tip });
        }

        let mut cache = self.cache.lock();
        let mut spent_entries = Vec::with_capacity(spent.len());
        for outpoint in spent {
            match self.lookup(&mut cache.coins, outpoint)? {
                Some(entry) => spent_entries.push((*outpoint, entry)),
                None => return Err(CoinViewError::MissingCoin(*outpoint)),
            }
        }
        for (outpoint, _) in created {
            if self.lookup(&mut cache.coins, outpoint)?.is_some() {
                return Err(CoinViewError::CoinOverwrite(*outpoint));
            }
        }

        let writes = spent.iter().map(|outpoint| (*outpoint, None)).chain(created.iter().map(|(outpoint, entry)| (*outpoint, Some(entry.clone()))));
        let slots = write_all(&mut cache.coins, writes);
        let seq = state.next_seq;
        state.undo.push_back(UndoRecord {
            seq,
            tip_before,
            tip_after,
            spent: spent_entries,
            created: created.iter().map(|(outpoint, _)| *outpoint).collect(),
        });
        state.next_seq = seq + 1;
        state.tip = tip_after;

        if let Err(err) = self.shrink_cache(&state, &mut cache) {
            state.undo.pop_back();
            state.next_seq = seq;
            state.tip = tip_before;
            restore_all(&mut cache.coins, slots);
            return Err(err);
        }
        while state.undo.len() > self.undo_depth {
            state.undo.pop_front();
        }
        Ok(())
    }

    /// Reverses the most recent changeset and returns the restored tip.
    /// On error the view is left as it was.
    pub fn rewind(&self) -> Result<Hash, CoinViewError> {
        let mut state = self.state.write();
        let record = state.undo.pop_back().ok_or(CoinViewError::RewindLimitExceeded)?;
        if record.tip_after != state.tip {
            let err = CoinViewError::ConcurrentModification { expected: record.tip_after, actual: state.tip };
            state.undo.push_back(record);
            return Err(err);
        }

        let mut cache = self.cache.lock();
        let writes = record.created.iter().map(|outpoint| (*outpoint, None)).chain(record.spent.iter().map(|(outpoint, entry)| (*outpoint, Some(entry.clone()))));
        let slots = write_all(&mut cache.coins, writes);
        let synced = cache.undo_synced;
        cache.undo_synced = synced.min(record.seq);
        state.next_seq = record.seq;
        state.tip = record.tip_before;

        if let Err(err) = self.shrink_cache(&state, &mut cache) {
            cache.undo_synced = synced;
            restore_all(&mut cache.coins, slots);
            state.next_seq = record.seq + 1;
            state.tip = record.tip_after;
            state.undo.push_back(record);
            return Err(err);
        }
        tracing::trace!("coin view rewound changeset {} to tip {}", record.seq, record.tip_before);
        Ok(record.tip_before)
    }

    /// Writes every dirty entry, the undo log and the current tip to the
    /// backing store
    pub fn flush(&self) -> Result<(), CoinViewError> {
        let state = self.state.read();
        let mut cache = self.cache.lock();
        let CacheState { coins, undo_synced } = &mut *cache;
        write_back(self.store.as_ref(), &state, undo_synced, coins.dirty_entries())?;
        coins.mark_clean();
        Ok(())
    }

    /// Full copy of the UTXO set at the current tip
    pub fn snapshot(&self) -> Result<(Hash, UtxoCollection), CoinViewError> {
        let state = self.state.read();
        let cache = self.cache.lock();
        let mut set = self.store.snapshot()?;
        for (outpoint, entry) in cache.coins.dirty_entries() {
            match entry {
                Some(entry) => set.insert(outpoint, entry),
                None => set.remove(&outpoint),
            };
        }
        Ok((state.tip, set))
    }
}

impl CoinSource for CoinView {
    fn fetch_coins(&self, outpoints: &HashSet<TransactionOutpoint>) -> Result<FetchCoinsResponse, CoinViewError> {
        let state = self.state.read();
        let mut cache = self.cache.lock();
        let mut coins = HashMap::with_capacity(outpoints.len());
        for outpoint in outpoints {
            coins.insert(*outpoint, self.lookup(&mut cache.coins, outpoint)?);
        }
        self.shrink_cache(&state, &mut cache)?;
        Ok(FetchCoinsResponse { tip: state.tip, coins })
    }
}

fn write_all(coins: &mut WriteBackCache<TransactionOutpoint, UtxoEntry>, writes: impl Iterator<Item = (TransactionOutpoint, Option<UtxoEntry>)>) -> Slots {
    let mut slots = Vec::new();
    for (outpoint, entry) in writes {
        slots.push((outpoint, coins.peek(&outpoint).cloned()));
        coins.write(outpoint, entry);
    }
    slots
}

fn restore_all(coins: &mut WriteBackCache<TransactionOutpoint, UtxoEntry>, slots: Slots) {
    for (outpoint, slot) in slots.into_iter().rev() {
        coins.restore(outpoint, slot);
    }
}

/// Persists `dirty` together with the tip and the undo log of `state`
fn write_back(store: &dyn CoinStore, state: &ViewState, undo_synced: &mut u64, dirty: Vec<(TransactionOutpoint, Option<UtxoEntry>)>) -> Result<(), DbError> {
    let mut batch = CoinBatch { tip: state.tip, undo_range: Some(state.undo_range()), ..Default::default() };
    for (outpoint, entry) in dirty {
        match entry {
            Some(entry) => batch.insertions.push((outpoint, entry)),
            None => batch.removals.push(outpoint),
        }
    }
    batch.undo_writes = state.undo.iter().filter(|record| record.seq >= *undo_synced).collect();
    store.batch_write(batch)?;
    *undo_synced = state.next_seq;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::tx::ScriptPublicKey;
    use database::stores::MemoryCoinStore;

    fn outpoint(n: u64) -> TransactionOutpoint {
        TransactionOutpoint::new(Hash::from_u64_word(n), 0)
    }

    fn entry(amount: u64) -> UtxoEntry {
        UtxoEntry::new(amount, ScriptPublicKey::AnyoneCanSpend, 1, false)
    }

    fn tip(n: u64) -> Hash {
        Hash::from_u64_word(1000 + n)
    }

    fn view_with(store: Arc<MemoryCoinStore>, max_entries: usize) -> CoinView {
        CoinView::new(store, tip(0), 8, max_entries, usize::MAX).unwrap()
    }

    fn keys(ns: &[u64]) -> HashSet<TransactionOutpoint> {
        ns.iter().map(|n| outpoint(*n)).collect()
    }

    #[test]
    fn save_changes_then_fetch() {
        let view = view_with(Arc::new(MemoryCoinStore::new()), 100);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(10)), (outpoint(2), entry(20))]).unwrap();
        view.save_changes(tip(1), tip(2), &[outpoint(1)], &[(outpoint(3), entry(9))]).unwrap();

        let response = view.fetch_coins(&keys(&[1, 2, 3])).unwrap();
        assert_eq!(response.tip, tip(2));
        assert_eq!(response.get(&outpoint(1)), None);
        assert_eq!(response.get(&outpoint(2)), Some(&entry(20)));
        assert_eq!(response.get(&outpoint(3)), Some(&entry(9)));
        assert_eq!(response.found().count(), 2);
    }

    #[test]
    fn stale_tip_is_refused() {
        let view = view_with(Arc::new(MemoryCoinStore::new()), 100);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(10))]).unwrap();
        let err = view.save_changes(tip(0), tip(2), &[], &[(outpoint(2), entry(1))]).unwrap_err();
        assert!(matches!(err, CoinViewError::ConcurrentModification { expected, actual } if expected == tip(0) && actual == tip(1)));
        assert_eq!(view.fetch_coins(&keys(&[2])).unwrap().get(&outpoint(2)), None);
    }

    #[test]
    fn invalid_changeset_leaves_view_untouched() {
        let view = view_with(Arc::new(MemoryCoinStore::new()), 100);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(10))]).unwrap();

        let err = view.save_changes(tip(1), tip(2), &[outpoint(1), outpoint(9)], &[(outpoint(2), entry(1))]).unwrap_err();
        assert!(matches!(err, CoinViewError::MissingCoin(op) if op == outpoint(9)));
        let err = view.save_changes(tip(1), tip(2), &[], &[(outpoint(1), entry(1))]).unwrap_err();
        assert!(matches!(err, CoinViewError::CoinOverwrite(_)));

        assert_eq!(view.tip(), tip(1));
        assert_eq!(view.fetch_coins(&keys(&[1])).unwrap().get(&outpoint(1)), Some(&entry(10)));
        assert_eq!(view.undo_len(), 1);
    }

    #[test]
    fn rewind_restores_previous_state() {
        let view = view_with(Arc::new(MemoryCoinStore::new()), 100);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(10)), (outpoint(2), entry(20))]).unwrap();
        let before = view.snapshot().unwrap();

        view.save_changes(tip(1), tip(2), &[outpoint(1)], &[(outpoint(3), entry(5))]).unwrap();
        assert_eq!(view.rewind().unwrap(), tip(1));
        assert_eq!(view.snapshot().unwrap(), before);

        assert_eq!(view.rewind().unwrap(), tip(0));
        assert!(matches!(view.rewind(), Err(CoinViewError::RewindLimitExceeded)));
        assert!(view.snapshot().unwrap().1.is_empty());
    }

    #[test]
    fn undo_log_is_bounded() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = CoinView::new(store, tip(0), 2, 100, usize::MAX).unwrap();
        for i in 0..4 {
            view.save_changes(tip(i), tip(i + 1), &[], &[(outpoint(i), entry(1))]).unwrap();
        }
        assert_eq!(view.undo_len(), 2);
        view.rewind().unwrap();
        view.rewind().unwrap();
        assert!(matches!(view.rewind(), Err(CoinViewError::RewindLimitExceeded)));
        assert_eq!(view.tip(), tip(2));
    }

    #[test]
    fn dirty_eviction_flushes_consistently() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = view_with(store.clone(), 2);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(1)), (outpoint(2), entry(2)), (outpoint(3), entry(3))]).unwrap();

        // Over budget with dirty entries: everything reached the store with the tip
        assert_eq!(store.tip().unwrap(), Some(tip(1)));
        assert_eq!(store.len(), 3);

        // Evicted entries fall through to the store
        let response = view.fetch_coins(&keys(&[1, 2, 3])).unwrap();
        assert_eq!(response.found().count(), 3);

        view.save_changes(tip(1), tip(2), &[outpoint(1)], &[]).unwrap();
        view.flush().unwrap();
        assert_eq!(store.get(&outpoint(1)).unwrap(), None);
        assert_eq!(store.tip().unwrap(), Some(tip(2)));
    }

    #[test]
    fn reopened_view_can_still_rewind() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = view_with(store.clone(), 100);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(1))]).unwrap();
        view.save_changes(tip(1), tip(2), &[outpoint(1)], &[(outpoint(2), entry(2))]).unwrap();
        view.flush().unwrap();
        drop(view);

        let reopened = view_with(store.clone(), 100);
        assert_eq!(reopened.tip(), tip(2));
        assert_eq!(reopened.undo_len(), 2);
        assert_eq!(reopened.rewind().unwrap(), tip(1));
        let response = reopened.fetch_coins(&keys(&[1, 2])).unwrap();
        assert_eq!(response.get(&outpoint(1)), Some(&entry(1)));
        assert_eq!(response.get(&outpoint(2)), None);

        // The rewound record is dropped from the store on the next write-back
        reopened.save_changes(tip(1), tip(3), &[], &[(outpoint(3), entry(3))]).unwrap();
        reopened.flush().unwrap();
        let records = store.undo_log().unwrap();
        assert_eq!(records.iter().map(|record| record.tip_after).collect::<Vec<_>>(), vec![tip(1), tip(3)]);
    }

    #[test]
    fn stored_undo_log_is_trimmed_to_depth() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = view_with(store.clone(), 100);
        for i in 0..5 {
            view.save_changes(tip(i), tip(i + 1), &[], &[(outpoint(i), entry(1))]).unwrap();
        }
        view.flush().unwrap();
        drop(view);

        let reopened = CoinView::new(store.clone(), tip(0), 2, 100, usize::MAX).unwrap();
        assert_eq!(reopened.undo_len(), 2);
        reopened.flush().unwrap();
        assert_eq!(store.undo_log().unwrap().len(), 2);
        reopened.rewind().unwrap();
        reopened.rewind().unwrap();
        assert!(matches!(reopened.rewind(), Err(CoinViewError::RewindLimitExceeded)));
        assert_eq!(reopened.tip(), tip(3));
    }

    #[test]
    fn failed_store_write_leaves_view_untouched() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = view_with(store.clone(), 1);
        store.set_fail_writes(true);
        let err = view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(1)), (outpoint(2), entry(2))]).unwrap_err();
        assert!(matches!(err, CoinViewError::Store(_)));
        assert_eq!(view.tip(), tip(0));
        assert_eq!(view.undo_len(), 0);
        assert!(view.snapshot().unwrap().1.is_empty());

        // The same changeset goes through once the store recovers
        store.set_fail_writes(false);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(1)), (outpoint(2), entry(2))]).unwrap();
        assert_eq!(view.tip(), tip(1));
    }

    #[test]
    fn failed_write_back_during_rewind_keeps_the_changeset() {
        let store = Arc::new(MemoryCoinStore::new());
        let view = view_with(store.clone(), 2);
        view.save_changes(tip(0), tip(1), &[], &[(outpoint(1), entry(1))]).unwrap();
        view.save_changes(tip(1), tip(2), &[outpoint(1)], &[(outpoint(2), entry(2)), (outpoint(3), entry(3))]).unwrap();
        let before = view.snapshot().unwrap();

        store.set_fail_writes(true);
        assert!(matches!(view.rewind(), Err(CoinViewError::Store(_))));
        assert_eq!(view.snapshot().unwrap(), before);
        assert_eq!(view.undo_len(), 2);

        store.set_fail_writes(false);
        assert_eq!(view.rewind().unwrap(), tip(1));
        assert_eq!(view.fetch_coins(&keys(&[1])).unwrap().get(&outpoint(1)), Some(&entry(1)));
    }
}
