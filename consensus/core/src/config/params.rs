use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::COIN;

/// Block production scheme a network runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusAlgorithm {
    #[serde(rename = "pow")]
    ProofOfWork,
    #[serde(rename = "pos")]
    ProofOfStake,
    #[serde(rename = "poa")]
    ProofOfAuthority,
}

impl ConsensusAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusAlgorithm::ProofOfWork => "pow",
            ConsensusAlgorithm::ProofOfStake => "pos",
            ConsensusAlgorithm::ProofOfAuthority => "poa",
        }
    }
}

impl fmt::Display for ConsensusAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsensusAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pow" | "proof-of-work" => Ok(ConsensusAlgorithm::ProofOfWork),
            "pos" | "proof-of-stake" => Ok(ConsensusAlgorithm::ProofOfStake),
            "poa" | "proof-of-authority" => Ok(ConsensusAlgorithm::ProofOfAuthority),
            other => Err(format!("unknown consensus algorithm '{other}'")),
        }
    }
}

/// Consensus parameters of a network. Everything validation, chain selection
/// and the coin view need to agree on lives here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Params {
    /// Network name ("mainnet", "regtest", ...)
    pub network: String,
    pub algorithm: ConsensusAlgorithm,

    /* Genesis */
    pub genesis_timestamp: u64,
    pub genesis_bits: u32,
    pub genesis_nonce: u64,

    /* Structure */
    pub max_block_size: u64,
    pub max_tx_size: u64,
    /// Seconds a header timestamp may run ahead of the local clock
    pub max_future_block_time: u64,

    /* Chain selection and finality */
    /// Depth below the tip beyond which reorgs are refused and headers may be pruned
    pub finality_depth: u64,
    /// Number of changesets the coin view keeps for rewinds
    pub undo_depth: usize,
    /// Depth at which coinbase and coinstake outputs become spendable
    pub coinbase_maturity: u64,

    /* Proof of work */
    pub pow_limit_bits: u32,
    pub pow_no_retargeting: bool,
    /// Target seconds between blocks
    pub target_spacing: u64,
    /// Blocks per difficulty window
    pub retarget_interval: u64,
    pub initial_subsidy: u64,
    pub subsidy_halving_interval: u64,

    /* Proof of stake */
    /// Last height produced by proof of work before staking takes over
    pub last_pow_height: u64,
    pub pos_limit_bits: u32,
    /// Coinstake timestamps must have these low bits cleared
    pub stake_timestamp_mask: u64,
    /// Maximum reward a coinstake may claim on top of its inputs
    pub stake_reward: u64,

    /* Proof of authority */
    /// Hex-encoded compressed public keys, in slot order
    pub federation: Vec<String>,
    pub poa_block_reward: u64,

    /* Resource budgets */
    pub coin_cache_max_entries: usize,
    pub coin_cache_max_bytes: usize,
    pub orphan_pool_size: usize,
    pub mempool_max_transactions: usize,
}

/// Compressed public keys of the secret keys 1, 2 and 3
const REGTEST_FEDERATION: [&str; 3] = [
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798",
    "02c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
    "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9",
];

impl Params {
    pub fn mainnet(algorithm: ConsensusAlgorithm) -> Self {
        let target_spacing = match algorithm {
            ConsensusAlgorithm::ProofOfWork => 600,
            ConsensusAlgorithm::ProofOfStake => 64,
            ConsensusAlgorithm::ProofOfAuthority => 16,
        };
        Self {
            network: "mainnet".to_string(),
            algorithm,
            genesis_timestamp: 1_700_000_000,
            genesis_bits: 0x1d00_ffff,
            genesis_nonce: 0,
            max_block_size: 1_000_000,
            max_tx_size: 100_000,
            max_future_block_time: 2 * 60 * 60,
            finality_depth: 500,
            undo_depth: 500,
            coinbase_maturity: 100,
            pow_limit_bits: 0x1d00_ffff,
            pow_no_retargeting: false,
            target_spacing,
            retarget_interval: 2016,
            initial_subsidy: 50 * COIN,
            subsidy_halving_interval: 210_000,
            last_pow_height: 10_000,
            pos_limit_bits: 0x1e0f_ffff,
            stake_timestamp_mask: 0x0f,
            stake_reward: COIN,
            federation: Vec::new(),
            poa_block_reward: 4 * COIN,
            coin_cache_max_entries: 1_000_000,
            coin_cache_max_bytes: 256 * 1024 * 1024,
            orphan_pool_size: 256,
            mempool_max_transactions: 50_000,
        }
    }

    /// Local test network: trivial targets, no retargeting, small windows
    pub fn regtest(algorithm: ConsensusAlgorithm) -> Self {
        Self {
            network: "regtest".to_string(),
            genesis_bits: 0x207f_ffff,
            finality_depth: 100,
            undo_depth: 100,
            pow_limit_bits: 0x207f_ffff,
            pow_no_retargeting: true,
            retarget_interval: 144,
            subsidy_halving_interval: 150,
            last_pow_height: 10,
            pos_limit_bits: 0x207f_ffff,
            stake_timestamp_mask: 0,
            federation: REGTEST_FEDERATION.iter().map(|key| key.to_string()).collect(),
            coin_cache_max_entries: 10_000,
            coin_cache_max_bytes: 8 * 1024 * 1024,
            orphan_pool_size: 64,
            mempool_max_transactions: 1_000,
            ..Self::mainnet(algorithm)
        }
    }

    pub fn for_network(network: &str, algorithm: ConsensusAlgorithm) -> Option<Self> {
        match network {
            "mainnet" => Some(Self::mainnet(algorithm)),
            "regtest" => Some(Self::regtest(algorithm)),
            _ => None,
        }
    }

    /// Decoded federation keys; malformed hex entries are reported by index
    pub fn federation_keys(&self) -> Result<Vec<Vec<u8>>, String> {
        self.federation
            .iter()
            .enumerate()
            .map(|(i, key)| hex::decode(key).map_err(|err| format!("federation key {i}: {err}")))
            .collect()
    }

    /// Height from which a header at `tip_height` is final
    pub fn finality_height(&self, tip_height: u64) -> u64 {
        tip_height.saturating_sub(self.finality_depth)
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::mainnet(ConsensusAlgorithm::ProofOfWork)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn algorithm_names_roundtrip() {
        for algorithm in [ConsensusAlgorithm::ProofOfWork, ConsensusAlgorithm::ProofOfStake, ConsensusAlgorithm::ProofOfAuthority] {
            assert_eq!(algorithm.as_str().parse::<ConsensusAlgorithm>().unwrap(), algorithm);
        }
        assert!("dpos".parse::<ConsensusAlgorithm>().is_err());
    }

    #[test]
    fn regtest_federation_decodes() {
        let params = Params::regtest(ConsensusAlgorithm::ProofOfAuthority);
        let keys = params.federation_keys().unwrap();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|key| key.len() == 33));
        assert_eq!(params.finality_height(150), 50);
        assert_eq!(params.finality_height(10), 0);
    }
}
