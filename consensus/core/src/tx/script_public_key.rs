use serde::{Deserialize, Serialize};

/// Locking condition of a transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ScriptPublicKey {
    /// Empty script. Used as the first output of a coinstake; never spendable.
    #[default]
    Empty,
    /// Spendable by any input (test networks and burn-free change)
    AnyoneCanSpend,
    /// Spendable by a compact ECDSA signature of the spending transaction's
    /// signing hash made with this (serialized) public key.
    PayToPubKey(Vec<u8>),
    /// Provably unspendable data carrier
    Data(Vec<u8>),
}

impl ScriptPublicKey {
    pub fn is_unspendable(&self) -> bool {
        matches!(self, ScriptPublicKey::Empty | ScriptPublicKey::Data(_))
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            ScriptPublicKey::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Serialized size estimate in bytes
    pub fn size(&self) -> usize {
        1 + match self {
            ScriptPublicKey::Empty | ScriptPublicKey::AnyoneCanSpend => 0,
            ScriptPublicKey::PayToPubKey(bytes) | ScriptPublicKey::Data(bytes) => 8 + bytes.len(),
        }
    }
}
