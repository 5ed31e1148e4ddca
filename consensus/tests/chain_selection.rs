mod common;

use common::*;
use consensus::pipeline::ChainEvent;
use consensus::SubmitOutcome;
use consensus_core::block::Block;
use consensus_core::errors::{ConsensusError, ErrorCode};
use consensus_core::header::Header;
use consensus_core::tx::{ScriptPublicKey, Transaction, TransactionOutpoint, TransactionOutput};
use consensus_core::{Hash, ZERO_HASH};

#[test]
fn heavier_branch_reorganizes_and_back() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let mut events = manager.subscribe();

    let a1 = mine_block(&params, &genesis, 1, Vec::new());
    let b1 = mine_block(&params, &genesis, 2, Vec::new());
    assert_eq!(manager.submit_block(a1.clone()).unwrap(), SubmitOutcome::Connected);
    // Equal work: the first seen tip stays active
    assert_eq!(manager.submit_block(b1.clone()).unwrap(), SubmitOutcome::SideBranch);
    assert_eq!(manager.get_best_tip().hash, a1.hash());

    let b2 = mine_block(&params, &b1.header, 2, Vec::new());
    assert_eq!(manager.submit_block(b2.clone()).unwrap(), SubmitOutcome::Connected);
    assert_eq!(manager.get_best_tip().hash, b2.hash());
    assert!(!manager.is_active(&a1.hash()));

    let a2 = mine_block(&params, &a1.header, 1, Vec::new());
    let a3 = mine_block(&params, &a2.header, 1, Vec::new());
    assert_eq!(manager.submit_block(a2.clone()).unwrap(), SubmitOutcome::SideBranch);
    drain(&mut events);
    assert_eq!(manager.submit_block(a3.clone()).unwrap(), SubmitOutcome::Connected);
    assert_eq!(manager.active_chain(), vec![genesis.hash(), a1.hash(), a2.hash(), a3.hash()]);

    // Disconnects come first, newest first, then connects in height order
    let order: Vec<(bool, Hash)> = drain(&mut events)
        .iter()
        .map(|event| (matches!(event, ChainEvent::BlockConnected { .. }), event.hash()))
        .collect();
    assert_eq!(order, vec![(false, b2.hash()), (false, b1.hash()), (true, a1.hash()), (true, a2.hash()), (true, a3.hash())]);

    // The coin view matches a node that only ever saw the winning branch
    let reference = node(params.clone());
    for block in [&a1, &a2, &a3] {
        reference.submit_block(block.clone()).unwrap();
    }
    let (tip, utxos) = manager.utxo_snapshot().unwrap();
    let (reference_tip, reference_utxos) = reference.utxo_snapshot().unwrap();
    assert_eq!(tip, reference_tip);
    assert_eq!(utxos, reference_utxos);
    assert!(!utxos.contains(&coinbase_outpoint(&b1)));
    assert!(utxos.contains(&coinbase_outpoint(&a1)));
}

#[test]
fn resubmission_is_a_duplicate() {
    let params = pow_params();
    let manager = node(params.clone());
    let block = mine_block(&params, &genesis_header(&params), 1, Vec::new());

    manager.submit_block(block.clone()).unwrap();
    let before = manager.utxo_snapshot().unwrap();
    assert_eq!(manager.submit_block(block.clone()).unwrap_err(), ConsensusError::Duplicate(block.hash()));
    assert_eq!(manager.submit_header(block.header.clone()).unwrap_err(), ConsensusError::Duplicate(block.hash()));
    assert_eq!(manager.utxo_snapshot().unwrap(), before);
}

#[test]
fn headers_first_then_bodies() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let b1 = mine_block(&params, &genesis, 1, Vec::new());
    let b2 = mine_block(&params, &b1.header, 1, Vec::new());

    manager.submit_header(b1.header.clone()).unwrap();
    manager.submit_header(b2.header.clone()).unwrap();
    assert_eq!(manager.best_header().hash, b2.hash());
    assert_eq!(manager.get_best_tip().hash, genesis.hash());

    manager.submit_block(b1.clone()).unwrap();
    assert_eq!(manager.submit_block(b2.clone()).unwrap(), SubmitOutcome::Connected);
    assert_eq!(manager.get_best_tip().hash, b2.hash());
}

#[test]
fn orphans_connect_once_the_parent_arrives() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let b1 = mine_block(&params, &genesis, 1, Vec::new());
    let b2 = mine_block(&params, &b1.header, 1, Vec::new());
    let b3 = mine_block(&params, &b2.header, 1, Vec::new());

    assert_eq!(manager.submit_block(b3.clone()).unwrap(), SubmitOutcome::Orphan);
    assert_eq!(manager.submit_block(b2.clone()).unwrap(), SubmitOutcome::Orphan);
    assert_eq!(manager.submit_block(b3.clone()).unwrap_err(), ConsensusError::Duplicate(b3.hash()));
    assert_eq!(manager.orphan_count(), 2);

    manager.submit_block(b1).unwrap();
    assert_eq!(manager.orphan_count(), 0);
    assert_eq!(manager.get_best_tip().hash, b3.hash());
}

#[test]
fn failed_connect_rolls_back_to_the_old_tip() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);

    let active = extend(&manager, &genesis, 2, 1);
    let chain_before = manager.active_chain();
    let coins_before = manager.utxo_snapshot().unwrap();

    // b2 passes every context-free stage but spends a coin that never existed
    let missing = TransactionOutpoint::new(Hash::from_u64_word(0xdead), 0);
    let b1 = mine_block(&params, &genesis, 2, Vec::new());
    let b2 = mine_block(&params, &b1.header, 2, vec![spend(&[missing], 1)]);
    let b3 = mine_block(&params, &b2.header, 2, Vec::new());
    assert_eq!(manager.submit_block(b1.clone()).unwrap(), SubmitOutcome::SideBranch);
    assert_eq!(manager.submit_block(b2.clone()).unwrap(), SubmitOutcome::SideBranch);

    let err = manager.submit_block(b3.clone()).unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidParent { hash, .. } if hash == b3.hash()));

    assert_eq!(manager.get_best_tip().hash, active[1].hash());
    assert_eq!(manager.active_chain(), chain_before);
    assert_eq!(manager.utxo_snapshot().unwrap(), coins_before);
    assert!(manager.block_status(&b2.hash()).unwrap().is_invalid());
    // b1 itself was fine and stays available
    assert!(!manager.block_status(&b1.hash()).unwrap().is_invalid());

    assert_eq!(manager.submit_block(b2.clone()).unwrap_err(), ConsensusError::KnownInvalid(b2.hash()));
}

#[test]
fn in_block_double_spend_fails_on_second_spend() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let blocks = extend(&manager, &genesis, 2, 1);
    let coin = coinbase_outpoint(&blocks[0]);

    let first = spend(&[coin], 10);
    let second = spend(&[coin], 20);
    let block = mine_block(&params, &blocks[1].header, 1, vec![first, second]);
    let err = manager.submit_block(block.clone()).unwrap_err();
    let rule_error = err.rule_error().unwrap();
    assert_eq!(rule_error.code(), ErrorCode::MissingOrSpentInputs);
    assert_eq!(rule_error.rule(), "check-spends");
    assert!(!err.ban_peer());
    assert_eq!(manager.get_best_tip().hash, blocks[1].hash());
}

#[test]
fn structurally_invalid_block_bans() {
    let params = pow_params();
    let manager = node(params.clone());
    let block = mine_block(&params, &genesis_header(&params), 1, Vec::new());
    let mut tampered = block.clone();
    tampered.transactions.push(spend(&[TransactionOutpoint::new(Hash::from_u64_word(1), 0)], 1));

    let err = manager.submit_block(tampered).unwrap_err();
    assert_eq!(err.rule_error().unwrap().code(), ErrorCode::StructurallyInvalid);
    assert_eq!(err.rule_error().unwrap().rule(), "merkle-root");
    assert!(err.ban_peer());

    // The header is not blamed for a body that does not match it
    assert!(!manager.block_status(&block.hash()).unwrap().is_invalid());
    assert_eq!(manager.submit_block(block.clone()).unwrap(), SubmitOutcome::Connected);
    assert_eq!(manager.get_best_tip().hash, block.hash());
}

#[test]
fn committed_body_failure_is_remembered() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let height = genesis.height + 1;
    let coinbase = |tag: u8| {
        let mut tx = Transaction::coinbase(height, vec![TransactionOutput::new(1, ScriptPublicKey::AnyoneCanSpend)]);
        tx.payload.push(tag);
        tx
    };

    let header = Header::new(genesis.hash(), ZERO_HASH, genesis.timestamp + params.target_spacing, genesis.bits, 0, height);
    let mut block = Block::with_committed_root(header, vec![coinbase(1), coinbase(2)]);
    assert!(consensus_pow::solve(&mut block.header, params.pow_limit_bits, 10_000).unwrap());

    let err = manager.submit_block(block.clone()).unwrap_err();
    assert_eq!(err.rule_error().unwrap().rule(), "coinbase-placement");
    assert!(manager.block_status(&block.hash()).unwrap().is_invalid());
    assert_eq!(manager.submit_block(block.clone()).unwrap_err(), ConsensusError::KnownInvalid(block.hash()));
}
