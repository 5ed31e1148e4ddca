use crate::header::Header;
use crate::Hash;
use crypto_hashes::HashWriter;

/// Computes the hash of a block header. The detached signature is excluded.
pub fn header_hash(header: &Header) -> Hash {
    let mut hasher = HashWriter::new();
    hasher
        .write_u16(header.version)
        .update(header.hash_prev_block)
        .update(header.hash_merkle_root)
        .write_u64(header.timestamp)
        .write_u32(header.bits)
        .write_u64(header.nonce)
        .write_u64(header.height);
    hasher.finalize()
}
