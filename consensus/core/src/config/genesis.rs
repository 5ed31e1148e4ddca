use crate::block::Block;
use crate::config::params::Params;
use crate::header::Header;
use crate::tx::{ScriptPublicKey, Transaction, TransactionOutput};
use crate::{Hash, ZERO_HASH};

const GENESIS_MESSAGE: &[u8] = b"chain genesis";

/// Genesis block of a network together with its hash
#[derive(Clone, Debug)]
pub struct GenesisBlock {
    pub hash: Hash,
    pub block: Block,
}

/// The genesis block of `params`. Its single coinbase output only carries a
/// message, so the coin view starts empty.
pub fn genesis_block(params: &Params) -> GenesisBlock {
    let coinbase = Transaction::coinbase(0, vec![TransactionOutput::new(0, ScriptPublicKey::Data(GENESIS_MESSAGE.to_vec()))]);
    let header = Header::new(ZERO_HASH, ZERO_HASH, params.genesis_timestamp, params.genesis_bits, params.genesis_nonce, 0);
    let block = Block::with_committed_root(header, vec![coinbase]);
    GenesisBlock { hash: block.hash(), block }
}
