use std::io::Write;

use chaind::{Config, Daemon, ImportSummary};
use consensus::process::coinbase::calc_block_subsidy;
use consensus_core::block::Block;
use consensus_core::config::{genesis_block, ConsensusAlgorithm, Params};
use consensus_core::header::Header;
use consensus_core::tx::{ScriptPublicKey, Transaction, TransactionOutput};
use consensus_core::ZERO_HASH;

fn regtest_config(data_dir: &std::path::Path, in_memory: bool) -> Config {
    let mut config = Config::default();
    config.network.name = "regtest".to_string();
    config.network.algorithm = ConsensusAlgorithm::ProofOfWork;
    config.storage.data_dir = data_dir.to_path_buf();
    config.storage.in_memory = in_memory;
    config
}

fn chain(params: &Params, count: usize) -> Vec<Block> {
    let mut parent = genesis_block(params).block.header;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let height = parent.height + 1;
        let coinbase = Transaction::coinbase(height, vec![TransactionOutput::new(calc_block_subsidy(params, height), ScriptPublicKey::AnyoneCanSpend)]);
        let header = Header::new(parent.hash(), ZERO_HASH, parent.timestamp + params.target_spacing, parent.bits, 0, height);
        let mut block = Block::with_committed_root(header, vec![coinbase]);
        assert!(consensus_pow::solve(&mut block.header, params.pow_limit_bits, 10_000).unwrap());
        parent = block.header.clone();
        blocks.push(block);
    }
    blocks
}

fn write_lines(path: &std::path::Path, blocks: &[Block]) {
    let mut file = std::fs::File::create(path).unwrap();
    for block in blocks {
        writeln!(file, "{}", serde_json::to_string(block).unwrap()).unwrap();
    }
}

#[test]
fn imports_json_lines_and_skips_bad_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let config = regtest_config(dir.path(), true);
    let params = config.params().unwrap();
    let mut blocks = chain(&params, 4);

    // A duplicate and a block with a broken merkle root
    let duplicate = blocks[1].clone();
    let mut broken = blocks[3].clone();
    broken.header.hash_merkle_root = ZERO_HASH;
    blocks.insert(2, duplicate);
    blocks.push(broken);

    let path = dir.path().join("blocks.jsonl");
    write_lines(&path, &blocks);

    let daemon = Daemon::new(config).unwrap();
    let summary = daemon.import_blocks(&path).unwrap();
    assert_eq!(summary, ImportSummary { connected: 4, duplicate: 1, rejected: 1, ..Default::default() });
    assert_eq!(daemon.consensus().get_best_tip().height, 4);
}

#[test]
fn malformed_lines_abort_the_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blocks.jsonl");
    std::fs::write(&path, "{\"header\": 1}\n").unwrap();

    let daemon = Daemon::new(regtest_config(dir.path(), true)).unwrap();
    let err = daemon.import_blocks(&path).unwrap_err();
    assert!(format!("{err:#}").contains("malformed block"));
}

#[test]
fn chain_state_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = regtest_config(dir.path(), false);
    let params = config.params().unwrap();
    let path = dir.path().join("blocks.jsonl");
    write_lines(&path, &chain(&params, 3));

    let tip = {
        let daemon = Daemon::new(config.clone()).unwrap();
        daemon.import_blocks(&path).unwrap();
        daemon.consensus().flush().unwrap();
        daemon.consensus().get_best_tip().hash
    };
    assert!(config.chainstate_dir().exists());

    let daemon = Daemon::new(config).unwrap();
    assert_eq!(daemon.consensus().get_best_tip().hash, tip);
    let summary = daemon.import_blocks(&path).unwrap();
    assert_eq!(summary.duplicate, 3);
}
