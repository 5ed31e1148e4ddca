use crate::cache::ReadCache;
use crate::db::CF_HEADERS;
use crate::{Database, DbResult};
use consensus_core::header::Header;
use consensus_core::Hash;
use std::sync::Arc;

pub struct HeaderStore {
    db: Arc<Database>,
    cache: ReadCache<Hash, Header>,
}

impl HeaderStore {
    pub fn new(db: Arc<Database>, cache_size: usize) -> Self {
        Self { db, cache: ReadCache::new(cache_size) }
    }

    pub fn put_header(&self, header: &Header) -> DbResult<()> {
        let hash = header.hash();
        self.db.put(CF_HEADERS, hash.as_bytes(), &bincode::serialize(header)?)?;
        self.cache.insert(hash, header.clone());
        Ok(())
    }

    pub fn get_header(&self, hash: &Hash) -> DbResult<Option<Header>> {
        if let Some(h) = self.cache.get(hash) {
            return Ok(Some(h));
        }
        match self.db.get(CF_HEADERS, hash.as_bytes())? {
            Some(data) => {
                let header: Header = bincode::deserialize(&data)?;
                self.cache.insert(*hash, header.clone());
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    pub fn has_header(&self, hash: &Hash) -> DbResult<bool> {
        if self.cache.contains(hash) {
            return Ok(true);
        }
        self.db.exists(CF_HEADERS, hash.as_bytes())
    }

    pub fn delete_header(&self, hash: &Hash) -> DbResult<()> {
        self.db.delete(CF_HEADERS, hash.as_bytes())?;
        self.cache.remove(hash);
        Ok(())
    }

    /// Every stored header, ordered by height so parents precede children
    pub fn all_headers(&self) -> DbResult<Vec<Header>> {
        let mut headers = Vec::new();
        for item in self.db.iterator(CF_HEADERS, rocksdb::IteratorMode::Start)? {
            let (_, value) = item?;
            headers.push(bincode::deserialize::<Header>(&value)?);
        }
        headers.sort_by_key(|h| h.height);
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::ZERO_HASH;
    use tempfile::TempDir;

    #[test]
    fn headers_come_back_parent_first() {
        let tmp = TempDir::new().unwrap();
        let store = HeaderStore::new(Arc::new(Database::open(tmp.path()).unwrap()), 16);
        let genesis = Header::new(ZERO_HASH, ZERO_HASH, 1, 0x207f_ffff, 0, 0);
        let mut child = Header::new(genesis.hash(), ZERO_HASH, 2, 0x207f_ffff, 0, 1);
        child.signature = vec![9; 64];

        store.put_header(&child).unwrap();
        store.put_header(&genesis).unwrap();

        assert_eq!(store.get_header(&child.hash()).unwrap(), Some(child.clone()));
        let all = store.all_headers().unwrap();
        assert_eq!(all, vec![genesis.clone(), child]);

        store.delete_header(&genesis.hash()).unwrap();
        assert!(!store.has_header(&genesis.hash()).unwrap());
    }
}
