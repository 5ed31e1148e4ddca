use crate::cache::ReadCache;
use crate::db::CF_BLOCKS;
use crate::{Database, DbResult};
use consensus_core::block::Block;
use consensus_core::Hash;
use std::sync::Arc;

pub struct BlockStore {
    db: Arc<Database>,
    cache: ReadCache<Hash, Arc<Block>>,
}

impl BlockStore {
    pub fn new(db: Arc<Database>, cache_size: usize) -> Self {
        Self { db, cache: ReadCache::new(cache_size) }
    }

    pub fn put_block(&self, block: &Block) -> DbResult<()> {
        let hash = block.hash();
        self.db.put(CF_BLOCKS, hash.as_bytes(), &bincode::serialize(block)?)?;
        self.cache.insert(hash, Arc::new(block.clone()));
        Ok(())
    }

    pub fn get_block(&self, hash: &Hash) -> DbResult<Option<Arc<Block>>> {
        if let Some(b) = self.cache.get(hash) {
            return Ok(Some(b));
        }
        match self.db.get(CF_BLOCKS, hash.as_bytes())? {
            Some(data) => {
                let block = Arc::new(bincode::deserialize::<Block>(&data)?);
                self.cache.insert(*hash, block.clone());
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn has_block(&self, hash: &Hash) -> DbResult<bool> {
        if self.cache.contains(hash) {
            return Ok(true);
        }
        self.db.exists(CF_BLOCKS, hash.as_bytes())
    }

    pub fn delete_block(&self, hash: &Hash) -> DbResult<()> {
        self.db.delete(CF_BLOCKS, hash.as_bytes())?;
        self.cache.remove(hash);
        Ok(())
    }
}
