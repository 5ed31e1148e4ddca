pub mod undo_record;
pub mod utxo_collection;
pub mod utxo_diff;

pub use undo_record::UndoRecord;
pub use utxo_collection::{UtxoCollection, UtxoError};
pub use utxo_diff::UtxoDiff;
