//! Per-transaction checks shared by block validation and mempool admission

use std::collections::HashSet;

use consensus_core::config::Params;
use consensus_core::constants::{LOCKTIME_THRESHOLD, MAX_MONEY, SEQUENCE_FINAL, SEQUENCE_LOCK_DISABLE_FLAG, SEQUENCE_LOCK_MASK, TX_VERSION_RELATIVE_LOCKS};
use consensus_core::errors::{RuleError, RuleResult};
use consensus_core::sign::verify_signature;
use consensus_core::tx::{ScriptPublicKey, Transaction, UtxoEntry};

use crate::consensus::validation::{LockPoints, TxLockPoints};

pub const TX_STRUCTURE: &str = "tx-structure";
pub const TX_FINALITY: &str = "tx-finality";
pub const COIN_MATURITY: &str = "coin-maturity";
pub const SEQUENCE_LOCKS: &str = "sequence-locks";
pub const SCRIPT_VERIFICATION: &str = "script-verification";
pub const TX_FEES: &str = "tx-fees";

/// Context-free structure of a transaction
pub fn check_transaction_structure(tx: &Transaction, params: &Params) -> RuleResult<()> {
    if tx.outputs.is_empty() {
        return Err(RuleError::structural(TX_STRUCTURE, format!("transaction {} has no outputs", tx.id())));
    }
    if tx.serialized_size() > params.max_tx_size {
        return Err(RuleError::structural(TX_STRUCTURE, format!("transaction {} exceeds {} bytes", tx.id(), params.max_tx_size)));
    }

    let mut total: u64 = 0;
    for (index, output) in tx.outputs.iter().enumerate() {
        if output.value == 0 && !output.script_public_key.is_unspendable() {
            return Err(RuleError::structural(TX_STRUCTURE, format!("output {index} of {} is a spendable zero-value output", tx.id())));
        }
        if output.value > MAX_MONEY {
            return Err(RuleError::structural(TX_STRUCTURE, format!("output {index} of {} exceeds max money", tx.id())));
        }
        total = total
            .checked_add(output.value)
            .filter(|total| *total <= MAX_MONEY)
            .ok_or_else(|| RuleError::structural(TX_STRUCTURE, format!("outputs of {} exceed max money", tx.id())))?;
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.previous_outpoint) {
            return Err(RuleError::structural(TX_STRUCTURE, format!("transaction {} spends {} twice", tx.id(), input.previous_outpoint)));
        }
    }
    Ok(())
}

/// Whether the absolute lock time of `tx` has passed at `lock_points`
pub fn is_final(tx: &Transaction, lock_points: &LockPoints) -> bool {
    if tx.lock_time == 0 {
        return true;
    }
    let threshold = if tx.lock_time < LOCKTIME_THRESHOLD { lock_points.height } else { lock_points.median_time_past };
    if tx.lock_time < threshold {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

pub fn check_finality(tx: &Transaction, lock_points: &LockPoints) -> RuleResult<()> {
    if is_final(tx, lock_points) {
        Ok(())
    } else {
        Err(RuleError::violation(TX_FINALITY, format!("transaction {} is locked until {}", tx.id(), tx.lock_time)))
    }
}

/// Reward outputs may only be spent once they are `maturity` blocks deep
pub fn check_maturity(tx: &Transaction, coins: &[UtxoEntry], spend_height: u64, maturity: u64) -> RuleResult<()> {
    for (input, coin) in tx.inputs.iter().zip(coins) {
        if !coin.is_reward() {
            continue;
        }
        let depth = spend_height.saturating_sub(coin.block_height);
        if depth < maturity {
            return Err(RuleError::violation(
                COIN_MATURITY,
                format!("{} spends reward output {} at depth {depth}, needs {maturity}", tx.id(), input.previous_outpoint),
            ));
        }
    }
    Ok(())
}

/// Relative height locks carried in input sequences. Only transactions of
/// version [`TX_VERSION_RELATIVE_LOCKS`] and up opt in.
pub fn calc_sequence_lock(tx: &Transaction, coins: &[UtxoEntry]) -> TxLockPoints {
    if tx.version < TX_VERSION_RELATIVE_LOCKS {
        return TxLockPoints::default();
    }
    let min_height = tx
        .inputs
        .iter()
        .zip(coins)
        .filter(|(input, _)| input.sequence & SEQUENCE_LOCK_DISABLE_FLAG == 0)
        .map(|(input, coin)| coin.block_height + (input.sequence & SEQUENCE_LOCK_MASK))
        .max()
        .unwrap_or(0);
    TxLockPoints { min_height }
}

pub fn check_sequence_locks(tx: &Transaction, coins: &[UtxoEntry], spend_height: u64) -> RuleResult<TxLockPoints> {
    let lock = calc_sequence_lock(tx, coins);
    if spend_height < lock.min_height {
        return Err(RuleError::violation(SEQUENCE_LOCKS, format!("{} is relatively locked until height {}", tx.id(), lock.min_height)));
    }
    Ok(lock)
}

/// Verifies every input against the locking script of the coin it spends
pub fn check_scripts(tx: &Transaction, coins: &[UtxoEntry]) -> RuleResult<()> {
    let signing_hash = tx.signing_hash();
    for (input, coin) in tx.inputs.iter().zip(coins) {
        match &coin.script_public_key {
            ScriptPublicKey::AnyoneCanSpend => {}
            ScriptPublicKey::PayToPubKey(public_key) => {
                if !verify_signature(public_key, &signing_hash, &input.signature_script) {
                    return Err(RuleError::violation(
                        SCRIPT_VERIFICATION,
                        format!("bad signature for {} in {}", input.previous_outpoint, tx.id()),
                    ));
                }
            }
            ScriptPublicKey::Empty | ScriptPublicKey::Data(_) => {
                return Err(RuleError::violation(SCRIPT_VERIFICATION, format!("{} spends unspendable {}", tx.id(), input.previous_outpoint)));
            }
        }
    }
    Ok(())
}

pub fn total_input(coins: &[UtxoEntry]) -> Option<u64> {
    coins.iter().try_fold(0u64, |total, coin| total.checked_add(coin.amount))
}

/// Fee paid by `tx`, failing when it creates more than it spends
pub fn calc_fee(tx: &Transaction, coins: &[UtxoEntry]) -> RuleResult<u64> {
    let inputs = total_input(coins).ok_or_else(|| RuleError::violation(TX_FEES, format!("inputs of {} overflow", tx.id())))?;
    let outputs = tx.total_output().ok_or_else(|| RuleError::structural(TX_FEES, format!("outputs of {} overflow", tx.id())))?;
    inputs
        .checked_sub(outputs)
        .ok_or_else(|| RuleError::violation(TX_FEES, format!("{} spends {inputs} but creates {outputs}", tx.id())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use consensus_core::config::ConsensusAlgorithm;
    use consensus_core::sign::{public_key, sign_hash, SecretKey};
    use consensus_core::tx::{TransactionInput, TransactionOutpoint, TransactionOutput};
    use consensus_core::Hash;

    fn spend(outpoints: &[TransactionOutpoint], value: u64) -> Transaction {
        let inputs = outpoints.iter().map(|op| TransactionInput::unsigned(*op)).collect();
        Transaction::new(1, inputs, vec![TransactionOutput::new(value, ScriptPublicKey::AnyoneCanSpend)], 0, Vec::new())
    }

    #[test]
    fn structure_rejects_zero_value_and_duplicate_inputs() {
        let params = Params::regtest(ConsensusAlgorithm::ProofOfWork);
        let op = TransactionOutpoint::new(Hash::from_u64_word(1), 0);

        assert!(check_transaction_structure(&spend(&[op], 5), &params).is_ok());
        let err = check_transaction_structure(&spend(&[op], 0), &params).unwrap_err();
        assert_eq!(err.rule(), TX_STRUCTURE);
        assert!(check_transaction_structure(&spend(&[op, op], 5), &params).is_err());

        let mut data = spend(&[op], 5);
        data.outputs.push(TransactionOutput::new(0, ScriptPublicKey::Data(b"memo".to_vec())));
        assert!(check_transaction_structure(&data, &params).is_ok());
    }

    #[test]
    fn maturity_boundary() {
        let op = TransactionOutpoint::new(Hash::from_u64_word(1), 0);
        let tx = spend(&[op], 5);
        let coins = vec![UtxoEntry::new(50, ScriptPublicKey::AnyoneCanSpend, 10, true)];
        assert!(check_maturity(&tx, &coins, 15, 100).is_err());
        assert!(check_maturity(&tx, &coins, 109, 100).is_err());
        assert!(check_maturity(&tx, &coins, 110, 100).is_ok());

        let plain = vec![UtxoEntry::new(50, ScriptPublicKey::AnyoneCanSpend, 10, false)];
        assert!(check_maturity(&tx, &plain, 11, 100).is_ok());
    }

    #[test]
    fn lock_time_by_height_and_time() {
        let op = TransactionOutpoint::new(Hash::from_u64_word(1), 0);
        let mut tx = spend(&[op], 5);
        tx.inputs[0].sequence = 0;
        tx.lock_time = 20;
        assert!(!is_final(&tx, &LockPoints { height: 20, median_time_past: 0 }));
        assert!(is_final(&tx, &LockPoints { height: 21, median_time_past: 0 }));

        tx.lock_time = LOCKTIME_THRESHOLD + 100;
        assert!(!is_final(&tx, &LockPoints { height: 1_000, median_time_past: LOCKTIME_THRESHOLD }));
        assert!(is_final(&tx, &LockPoints { height: 1_000, median_time_past: LOCKTIME_THRESHOLD + 101 }));

        tx.inputs[0].sequence = SEQUENCE_FINAL;
        assert!(is_final(&tx, &LockPoints::default()));
    }

    #[test]
    fn relative_locks_need_version_two() {
        let op = TransactionOutpoint::new(Hash::from_u64_word(1), 0);
        let coins = vec![UtxoEntry::new(50, ScriptPublicKey::AnyoneCanSpend, 10, false)];
        let mut tx = spend(&[op], 5);
        tx.inputs[0].sequence = 5;
        assert_eq!(calc_sequence_lock(&tx, &coins).min_height, 0);

        tx.version = TX_VERSION_RELATIVE_LOCKS;
        assert!(check_sequence_locks(&tx, &coins, 14).is_err());
        assert_eq!(check_sequence_locks(&tx, &coins, 15).unwrap().min_height, 15);

        tx.inputs[0].sequence |= SEQUENCE_LOCK_DISABLE_FLAG;
        assert!(check_sequence_locks(&tx, &coins, 11).is_ok());
    }

    #[test]
    fn pay_to_pubkey_needs_valid_signature() {
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let coins = vec![UtxoEntry::new(50, ScriptPublicKey::PayToPubKey(public_key(&secret).serialize().to_vec()), 1, false)];
        let op = TransactionOutpoint::new(Hash::from_u64_word(1), 0);
        let mut tx = spend(&[op], 40);
        assert_eq!(check_scripts(&tx, &coins).unwrap_err().rule(), SCRIPT_VERIFICATION);

        tx.inputs[0].signature_script = sign_hash(&secret, &tx.signing_hash()).unwrap();
        assert!(check_scripts(&tx, &coins).is_ok());
        assert_eq!(calc_fee(&tx, &coins).unwrap(), 10);

        tx.outputs[0].value = 51;
        assert!(calc_fee(&tx, &coins).is_err());
    }
}
