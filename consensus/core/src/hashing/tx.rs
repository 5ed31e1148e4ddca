use crate::tx::{ScriptPublicKey, Transaction};
use crate::Hash;
use crypto_hashes::HashWriter;

/// Transaction id: commits to every field including signature scripts.
pub fn transaction_id(tx: &Transaction) -> Hash {
    let mut hasher = HashWriter::new();
    write_transaction(&mut hasher, tx, true);
    hasher.finalize()
}

/// Hash signed by each input: the transaction with all signature scripts omitted.
pub fn signing_hash(tx: &Transaction) -> Hash {
    let mut hasher = HashWriter::new();
    write_transaction(&mut hasher, tx, false);
    hasher.finalize()
}

fn write_transaction(hasher: &mut HashWriter, tx: &Transaction, include_signatures: bool) {
    hasher.write_u16(tx.version).write_u64(tx.inputs.len() as u64);
    for input in &tx.inputs {
        hasher.update(input.previous_outpoint.transaction_id).write_u32(input.previous_outpoint.index);
        if include_signatures {
            hasher.write_var_bytes(&input.signature_script);
        }
        hasher.write_u64(input.sequence);
    }
    hasher.write_u64(tx.outputs.len() as u64);
    for output in &tx.outputs {
        hasher.write_u64(output.value);
        write_script(hasher, &output.script_public_key);
    }
    hasher.write_u64(tx.lock_time).write_var_bytes(&tx.payload);
}

fn write_script(hasher: &mut HashWriter, script: &ScriptPublicKey) {
    match script {
        ScriptPublicKey::Empty => hasher.update([0u8]),
        ScriptPublicKey::AnyoneCanSpend => hasher.update([1u8]),
        ScriptPublicKey::PayToPubKey(key) => hasher.update([2u8]).write_var_bytes(key),
        ScriptPublicKey::Data(data) => hasher.update([3u8]).write_var_bytes(data),
    };
}
