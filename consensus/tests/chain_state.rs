mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use common::*;
use consensus::{BlockStatus, CoinSource, CoinView, SubmitOutcome};
use consensus_core::errors::ConsensusError;
use consensus_core::tx::{ScriptPublicKey, TransactionOutpoint, UtxoEntry};
use consensus_core::Hash;
use database::stores::MemoryCoinStore;

fn shallow_finality_params() -> consensus_core::config::Params {
    let mut params = pow_params();
    params.finality_depth = 2;
    params
}

#[test]
fn fork_below_finality_is_stale() {
    let params = shallow_finality_params();
    let manager = node(params.clone());
    let blocks = extend(&manager, &genesis_header(&params), 5, 1);

    let late = mine_block(&params, &blocks[0].header, 2, Vec::new());
    assert_eq!(manager.submit_block(late.clone()).unwrap(), SubmitOutcome::Stale);
    assert!(!manager.is_active(&late.hash()));
    assert_eq!(manager.block_status(&late.hash()), Some(BlockStatus::HeaderOnly));
    assert_eq!(manager.get_best_tip().hash, blocks[4].hash());
}

#[test]
fn side_branches_are_pruned_once_final() {
    let params = shallow_finality_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let blocks = extend(&manager, &genesis, 2, 1);

    let side = mine_block(&params, &blocks[0].header, 2, Vec::new());
    assert_eq!(manager.submit_block(side.clone()).unwrap(), SubmitOutcome::SideBranch);
    assert!(manager.get_block(&side.hash()).unwrap().is_some());

    extend(&manager, &blocks[1].header, 2, 1);
    assert!(manager.header(&side.hash()).is_some());

    // Finality reaches height 3, past the side block
    extend(&manager, &manager.get_best_tip().header, 1, 1);
    assert!(manager.header(&side.hash()).is_none());
    assert!(manager.get_block(&side.hash()).unwrap().is_none());
    assert_eq!(manager.active_chain().len(), 6);
}

#[test]
fn heavier_headers_wait_for_their_bodies() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let main = extend(&manager, &genesis, 1, 1);

    let first = mine_block(&params, &genesis, 2, Vec::new());
    let second = mine_block(&params, &first.header, 2, Vec::new());
    manager.submit_header(first.header.clone()).unwrap();
    let tip_candidate = manager.submit_header(second.header.clone()).unwrap();
    assert!(tip_candidate.chain_work > manager.get_best_tip().chain_work);
    assert_eq!(manager.get_best_tip().hash, main[0].hash());

    assert_eq!(manager.submit_block(second.clone()).unwrap(), SubmitOutcome::SideBranch);
    assert_eq!(manager.get_best_tip().hash, main[0].hash());
    manager.submit_block(first).unwrap();
    assert_eq!(manager.get_best_tip().hash, second.hash());
}

#[test]
fn moved_coin_view_aborts_without_condemning_the_block() {
    let params = pow_params();
    let manager = node(params.clone());
    let genesis = genesis_header(&params);
    let blocks = extend(&manager, &genesis, 1, 1);
    let tip = blocks[0].hash();

    let elsewhere = Hash::from_u64_word(77);
    manager.coin_view().save_changes(tip, elsewhere, &[], &[]).unwrap();

    let next = mine_block(&params, &blocks[0].header, 1, Vec::new());
    let err = manager.submit_block(next.clone()).unwrap_err();
    assert_eq!(err, ConsensusError::ConcurrentModification { expected: tip, actual: elsewhere });
    assert!(!err.is_fatal());
    assert!(!manager.block_status(&next.hash()).unwrap().is_invalid());
    assert_eq!(manager.get_best_tip().hash, tip);

    // Once the view is back, the stored block connects with its child
    assert_eq!(manager.coin_view().rewind().unwrap(), tip);
    let child = mine_block(&params, &next.header, 1, Vec::new());
    assert_eq!(manager.submit_block(child.clone()).unwrap(), SubmitOutcome::Connected);
    assert!(manager.is_active(&next.hash()));
    assert_eq!(manager.get_best_tip().hash, child.hash());
}

fn outpoint(step: u64) -> TransactionOutpoint {
    TransactionOutpoint::new(Hash::from_u64_word(step), 0)
}

fn tip_at(step: u64) -> Hash {
    Hash::from_u64_word(10_000 + step)
}

#[test]
fn readers_see_whole_changesets() {
    const STEPS: u64 = 200;
    let view = Arc::new(CoinView::new(Arc::new(MemoryCoinStore::new()), tip_at(0), 8, 4, usize::MAX).unwrap());
    let steps: HashMap<Hash, u64> = (0..=STEPS).map(|step| (tip_at(step), step)).collect();
    let wanted: HashSet<_> = (0..=STEPS).map(outpoint).collect();

    std::thread::scope(|scope| {
        let writer = view.clone();
        scope.spawn(move || {
            // At tip_at(k) exactly outpoint(k) is unspent, none at tip_at(0)
            for step in 0..STEPS {
                let spent: Vec<_> = if step == 0 { Vec::new() } else { vec![outpoint(step)] };
                let created = [(outpoint(step + 1), UtxoEntry::new(step + 1, ScriptPublicKey::AnyoneCanSpend, step + 1, false))];
                writer.save_changes(tip_at(step), tip_at(step + 1), &spent, &created).unwrap();
                if step % 3 == 0 {
                    writer.rewind().unwrap();
                    writer.save_changes(tip_at(step), tip_at(step + 1), &spent, &created).unwrap();
                }
            }
        });

        for _ in 0..4 {
            let reader = view.clone();
            let (steps, wanted) = (&steps, &wanted);
            scope.spawn(move || {
                for _ in 0..100 {
                    let response = reader.fetch_coins(wanted).unwrap();
                    let step = steps[&response.tip];
                    let found: Vec<_> = response.found().map(|(outpoint, _)| *outpoint).collect();
                    let expected = if step == 0 { Vec::new() } else { vec![outpoint(step)] };
                    assert_eq!(found, expected, "coins at step {step}");
                }
            });
        }
    });
    assert_eq!(view.tip(), tip_at(STEPS));
}
