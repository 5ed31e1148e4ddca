use serde::{Deserialize, Serialize};

use crate::constants::BLOCK_VERSION;
use crate::hashing;
use crate::{Hash, ZERO_HASH};

/// Block header. Identified by [`Header::hash`], which covers every field
/// except the detached `signature` (signed over the hash by PoA producers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub version: u16,
    pub hash_prev_block: Hash,
    pub hash_merkle_root: Hash,
    /// Seconds since the unix epoch
    pub timestamp: u64,
    /// Compact target
    pub bits: u32,
    pub nonce: u64,
    pub height: u64,
    #[serde(default, with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl Header {
    /// Serialized size of every field but the signature
    pub const SERIALIZED_BASE_SIZE: u64 = 2 + 32 + 32 + 8 + 4 + 8 + 8;

    pub fn new(hash_prev_block: Hash, hash_merkle_root: Hash, timestamp: u64, bits: u32, nonce: u64, height: u64) -> Self {
        Self { version: BLOCK_VERSION, hash_prev_block, hash_merkle_root, timestamp, bits, nonce, height, signature: Vec::new() }
    }

    pub fn hash(&self) -> Hash {
        hashing::header::header_hash(self)
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.hash_prev_block == ZERO_HASH
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
