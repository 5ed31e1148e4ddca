use crate::db::{CF_METADATA, CF_UNDO, CF_UTXOS};
use crate::{Database, DbError, DbResult};
use consensus_core::tx::{TransactionOutpoint, UtxoEntry};
use consensus_core::utxo::{UndoRecord, UtxoCollection};
use consensus_core::Hash;
use std::ops::Range;
use std::sync::Arc;

const UTXO_TIP_KEY: &[u8] = b"utxo_tip";

/// One write-back of the coin view: coin changes, the tip they lead to and
/// the undo log that can reverse them.
#[derive(Debug, Default)]
pub struct CoinBatch<'a> {
    pub removals: Vec<TransactionOutpoint>,
    pub insertions: Vec<(TransactionOutpoint, UtxoEntry)>,
    pub tip: Hash,
    /// Undo records the store has not seen in this form
    pub undo_writes: Vec<&'a UndoRecord>,
    /// Sequence numbers of the live undo log. Stored records outside the
    /// range are dropped; `None` leaves the stored log alone.
    pub undo_range: Option<Range<u64>>,
}

impl CoinBatch<'_> {
    /// Coin changes only, the stored undo log is kept as is
    pub fn coins(removals: Vec<TransactionOutpoint>, insertions: Vec<(TransactionOutpoint, UtxoEntry)>, tip: Hash) -> Self {
        Self { removals, insertions, tip, undo_writes: Vec::new(), undo_range: None }
    }
}

/// Persistent backing store of the coin view.
///
/// `batch_write` must apply a whole [`CoinBatch`] atomically.
pub trait CoinStore: Send + Sync {
    fn get(&self, outpoint: &TransactionOutpoint) -> DbResult<Option<UtxoEntry>>;

    /// Tip the stored set corresponds to, `None` for a fresh store
    fn tip(&self) -> DbResult<Option<Hash>>;

    fn batch_write(&self, batch: CoinBatch<'_>) -> DbResult<()>;

    /// Stored undo log, oldest record first
    fn undo_log(&self) -> DbResult<Vec<UndoRecord>>;

    /// Full copy of the stored set
    fn snapshot(&self) -> DbResult<UtxoCollection>;
}

/// RocksDB coin store: entries in `CF_UTXOS`, undo records in `CF_UNDO`
/// keyed by big-endian sequence number, the tip in `CF_METADATA`
pub struct UtxoStore {
    db: Arc<Database>,
}

impl UtxoStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn count(&self) -> DbResult<usize> {
        let mut count = 0usize;
        for item in self.db.iterator(CF_UTXOS, rocksdb::IteratorMode::Start)? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn key_to_outpoint(key: &[u8]) -> DbResult<TransactionOutpoint> {
        if key.len() != 36 {
            return Err(DbError::Corrupted(format!("utxo key of length {}", key.len())));
        }
        let transaction_id = Hash::try_from_slice(&key[..32]).map_err(|err| DbError::Corrupted(err.to_string()))?;
        let mut index = [0u8; 4];
        index.copy_from_slice(&key[32..]);
        Ok(TransactionOutpoint::new(transaction_id, u32::from_le_bytes(index)))
    }
}

impl CoinStore for UtxoStore {
    fn get(&self, outpoint: &TransactionOutpoint) -> DbResult<Option<UtxoEntry>> {
        match self.db.get(CF_UTXOS, &outpoint.to_key())? {
            Some(data) => Ok(Some(bincode::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    fn tip(&self) -> DbResult<Option<Hash>> {
        match self.db.get(CF_METADATA, UTXO_TIP_KEY)? {
            Some(data) => Hash::try_from_slice(&data).map(Some).map_err(|_| DbError::Corrupted(format!("utxo tip of length {}", data.len()))),
            None => Ok(None),
        }
    }

    fn batch_write(&self, batch: CoinBatch<'_>) -> DbResult<()> {
        let mut wb = self.db.batch();
        for outpoint in &batch.removals {
            self.db.batch_delete(&mut wb, CF_UTXOS, &outpoint.to_key())?;
        }
        for (outpoint, entry) in &batch.insertions {
            self.db.batch_put(&mut wb, CF_UTXOS, &outpoint.to_key(), &bincode::serialize(entry)?)?;
        }
        if let Some(range) = &batch.undo_range {
            self.db.batch_delete_range(&mut wb, CF_UNDO, &0u64.to_be_bytes(), &range.start.to_be_bytes())?;
            self.db.batch_delete_range(&mut wb, CF_UNDO, &range.end.to_be_bytes(), &u64::MAX.to_be_bytes())?;
        }
        for record in &batch.undo_writes {
            self.db.batch_put(&mut wb, CF_UNDO, &record.seq.to_be_bytes(), &bincode::serialize(*record)?)?;
        }
        self.db.batch_put(&mut wb, CF_METADATA, UTXO_TIP_KEY, batch.tip.as_bytes())?;
        self.db.write_batch(wb)?;
        tracing::trace!(
            "utxo store: -{} +{} undo +{} at tip {}",
            batch.removals.len(),
            batch.insertions.len(),
            batch.undo_writes.len(),
            batch.tip
        );
        Ok(())
    }

    fn undo_log(&self) -> DbResult<Vec<UndoRecord>> {
        let mut records = Vec::new();
        for item in self.db.iterator(CF_UNDO, rocksdb::IteratorMode::Start)? {
            let (_, value) = item?;
            records.push(bincode::deserialize(&value)?);
        }
        Ok(records)
    }

    fn snapshot(&self) -> DbResult<UtxoCollection> {
        let mut set = UtxoCollection::new();
        for item in self.db.iterator(CF_UTXOS, rocksdb::IteratorMode::Start)? {
            let (key, value) = item?;
            set.insert(Self::key_to_outpoint(&key)?, bincode::deserialize(&value)?);
        }
        Ok(set)
    }
}
