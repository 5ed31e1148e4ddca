use serde::{Deserialize, Serialize};

use crate::{
    header::Header,
    merkle::calc_merkle_root,
    tx::{Transaction, COINBASE_TRANSACTION_INDEX, COINSTAKE_TRANSACTION_INDEX},
    Hash,
};

/// Complete block: header plus the ordered transaction list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// Builds a block whose header commits to `transactions`
    pub fn with_committed_root(mut header: Header, transactions: Vec<Transaction>) -> Self {
        header.hash_merkle_root = calc_merkle_root(transactions.iter().map(Transaction::id));
        Self { header, transactions }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn calculate_merkle_root(&self) -> Hash {
        calc_merkle_root(self.transactions.iter().map(Transaction::id))
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.get(COINBASE_TRANSACTION_INDEX)
    }

    /// The second transaction when it has coinstake shape
    pub fn coinstake(&self) -> Option<&Transaction> {
        self.transactions.get(COINSTAKE_TRANSACTION_INDEX).filter(|tx| tx.is_coinstake())
    }

    pub fn is_proof_of_stake(&self) -> bool {
        self.coinstake().is_some()
    }

    /// Header plus transactions, in bytes
    pub fn serialized_size(&self) -> u64 {
        Header::SERIALIZED_BASE_SIZE + self.header.signature.len() as u64 + self.transactions.iter().map(Transaction::serialized_size).sum::<u64>()
    }
}
