//!
//! # Transaction
//!
//! This module implements consensus [`Transaction`] structure and related types.
//!

mod script_public_key;

pub use script_public_key::ScriptPublicKey;

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::constants::{SEQUENCE_FINAL, TX_VERSION};
use crate::hashing;
use crate::Hash;

/// COINBASE_TRANSACTION_INDEX is the index of the coinbase transaction in every block
pub const COINBASE_TRANSACTION_INDEX: usize = 0;
/// Index of the coinstake transaction in a proof-of-stake block
pub const COINSTAKE_TRANSACTION_INDEX: usize = 1;

/// A 32-byte transaction identifier.
pub type TransactionId = crate::Hash;

pub type TransactionIndexType = u32;

/// A single spendable output as recorded in the coin view: its value and
/// locking condition, the height of the block that created it and the
/// maturity markers of reward outputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoEntry {
    pub amount: u64,
    pub script_public_key: ScriptPublicKey,
    pub block_height: u64,
    pub is_coinbase: bool,
    #[serde(default)]
    pub is_coinstake: bool,
}

impl UtxoEntry {
    pub fn new(amount: u64, script_public_key: ScriptPublicKey, block_height: u64, is_coinbase: bool) -> Self {
        Self { amount, script_public_key, block_height, is_coinbase, is_coinstake: false }
    }

    pub fn coinstake(amount: u64, script_public_key: ScriptPublicKey, block_height: u64) -> Self {
        Self { amount, script_public_key, block_height, is_coinbase: false, is_coinstake: true }
    }

    /// Block-reward outputs are subject to maturity
    pub fn is_reward(&self) -> bool {
        self.is_coinbase || self.is_coinstake
    }

    /// Approximate in-memory footprint, used by cache budgets
    pub fn mem_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.script_public_key.size()
    }
}

/// Reference to a transaction output
#[derive(Eq, Default, Hash, PartialEq, Debug, Copy, Clone, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutpoint {
    pub transaction_id: TransactionId,
    pub index: TransactionIndexType,
}

impl TransactionOutpoint {
    pub fn new(transaction_id: TransactionId, index: u32) -> Self {
        Self { transaction_id, index }
    }

    /// Storage key: transaction id followed by the little-endian index
    pub fn to_key(&self) -> [u8; 36] {
        let mut key = [0u8; 36];
        key[..32].copy_from_slice(self.transaction_id.as_bytes());
        key[32..].copy_from_slice(&self.index.to_le_bytes());
        key
    }
}

impl Display for TransactionOutpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.transaction_id, self.index)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub previous_outpoint: TransactionOutpoint,
    pub signature_script: Vec<u8>,
    pub sequence: u64,
}

impl TransactionInput {
    pub fn new(previous_outpoint: TransactionOutpoint, signature_script: Vec<u8>, sequence: u64) -> Self {
        Self { previous_outpoint, signature_script, sequence }
    }

    /// An input with an empty signature script and final sequence
    pub fn unsigned(previous_outpoint: TransactionOutpoint) -> Self {
        Self::new(previous_outpoint, Vec::new(), SEQUENCE_FINAL)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionOutput {
    pub value: u64,
    pub script_public_key: ScriptPublicKey,
}

impl TransactionOutput {
    pub fn new(value: u64, script_public_key: ScriptPublicKey) -> Self {
        Self { value, script_public_key }
    }

    pub fn is_empty(&self) -> bool {
        self.value == 0 && self.script_public_key == ScriptPublicKey::Empty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub version: u16,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub lock_time: u64,
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn new(version: u16, inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>, lock_time: u64, payload: Vec<u8>) -> Self {
        Self { version, inputs, outputs, lock_time, payload }
    }

    /// Coinbase paying `outputs`, committing to `height` in its payload
    pub fn coinbase(height: u64, outputs: Vec<TransactionOutput>) -> Self {
        Self::new(TX_VERSION, Vec::new(), outputs, 0, height.to_le_bytes().to_vec())
    }

    pub fn id(&self) -> TransactionId {
        hashing::tx::transaction_id(self)
    }

    pub fn signing_hash(&self) -> Hash {
        hashing::tx::signing_hash(self)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Coinstake: spends at least one input and marks its first output empty
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty() && self.outputs.len() >= 2 && self.outputs[0].is_empty()
    }

    /// Sum of output values, `None` on overflow
    pub fn total_output(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    pub fn outpoint(&self, index: u32) -> TransactionOutpoint {
        TransactionOutpoint::new(self.id(), index)
    }

    /// Estimated serialized size in bytes
    pub fn serialized_size(&self) -> u64 {
        let mut size = 2 + 8 + 8 + 8 + self.payload.len() as u64;
        for input in &self.inputs {
            size += 36 + 8 + 8 + input.signature_script.len() as u64;
        }
        for output in &self.outputs {
            size += 8 + output.script_public_key.size() as u64;
        }
        size
    }
}
