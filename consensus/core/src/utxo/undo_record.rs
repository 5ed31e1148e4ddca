use serde::{Deserialize, Serialize};

use crate::tx::{TransactionOutpoint, UtxoEntry};
use crate::Hash;

/// One applied changeset of the coin view, kept so it can be reversed.
///
/// Records carry consecutive sequence numbers; the newest record always ends
/// at the coin view tip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoRecord {
    pub seq: u64,
    pub tip_before: Hash,
    pub tip_after: Hash,
    /// Coins the changeset consumed, restored by a rewind
    pub spent: Vec<(TransactionOutpoint, UtxoEntry)>,
    /// Coins the changeset added, removed by a rewind
    pub created: Vec<TransactionOutpoint>,
}
