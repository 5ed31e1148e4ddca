//! Block store for consensus
//!
//! Bodies of validated blocks and the changesets computed when they were
//! connected. Backed by the database stores when the node runs persistent.

use consensus_core::block::Block;
use consensus_core::errors::{ConsensusError, ConsensusResult};
use consensus_core::header::Header;
use consensus_core::utxo::UtxoDiff;
use consensus_core::Hash;
use database::stores::{BlockStore as DbBlockStore, HeaderStore as DbHeaderStore};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct BlockStore {
    blocks: RwLock<HashMap<Hash, Arc<Block>>>,
    changesets: RwLock<HashMap<Hash, Arc<UtxoDiff>>>,
    db_store: Option<Arc<DbBlockStore>>,
    db_header_store: Option<Arc<DbHeaderStore>>,
}

impl BlockStore {
    /// Memory-only store
    pub fn new() -> Self {
        Self { blocks: RwLock::new(HashMap::new()), changesets: RwLock::new(HashMap::new()), db_store: None, db_header_store: None }
    }

    /// Store writing headers and bodies through to the database
    pub fn new_with_db(db_store: Arc<DbBlockStore>, header_store: Arc<DbHeaderStore>) -> Self {
        Self { db_store: Some(db_store), db_header_store: Some(header_store), ..Self::new() }
    }

    pub fn has_db(&self) -> bool {
        self.db_store.is_some()
    }

    pub fn store_header(&self, header: &Header) -> ConsensusResult<()> {
        if let Some(db) = &self.db_header_store {
            db.put_header(header).map_err(storage_error)?;
        }
        Ok(())
    }

    /// Persisted headers, parents first. Empty for memory-only stores.
    pub fn load_headers(&self) -> ConsensusResult<Vec<Header>> {
        match &self.db_header_store {
            Some(db) => db.all_headers().map_err(storage_error),
            None => Ok(Vec::new()),
        }
    }

    pub fn store_block(&self, block: Arc<Block>) -> ConsensusResult<()> {
        let hash = block.hash();
        if let Some(db) = &self.db_store {
            db.put_block(&block).map_err(storage_error)?;
        }
        self.blocks.write().insert(hash, block);
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash) -> ConsensusResult<Option<Arc<Block>>> {
        if let Some(block) = self.blocks.read().get(hash) {
            return Ok(Some(block.clone()));
        }
        match &self.db_store {
            Some(db) => db.get_block(hash).map_err(storage_error),
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> ConsensusResult<bool> {
        if self.blocks.read().contains_key(hash) {
            return Ok(true);
        }
        match &self.db_store {
            Some(db) => db.has_block(hash).map_err(storage_error),
            None => Ok(false),
        }
    }

    pub fn store_changeset(&self, hash: Hash, diff: Arc<UtxoDiff>) {
        self.changesets.write().insert(hash, diff);
    }

    pub fn get_changeset(&self, hash: &Hash) -> Option<Arc<UtxoDiff>> {
        self.changesets.read().get(hash).cloned()
    }

    /// Forgets pruned blocks, from memory and the database
    pub fn remove(&self, hashes: &[Hash]) -> ConsensusResult<()> {
        let mut blocks = self.blocks.write();
        let mut changesets = self.changesets.write();
        for hash in hashes {
            blocks.remove(hash);
            changesets.remove(hash);
            if let Some(db) = &self.db_store {
                db.delete_block(hash).map_err(storage_error)?;
            }
            if let Some(db) = &self.db_header_store {
                db.delete_header(hash).map_err(storage_error)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.blocks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

fn storage_error(err: database::DbError) -> ConsensusError {
    ConsensusError::Storage(err.to_string())
}
