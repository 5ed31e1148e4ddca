use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use consensus_core::config::{ConsensusAlgorithm, Params};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub consensus: ConsensusConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Parameter preset the node starts from
    pub name: String,
    pub algorithm: ConsensusAlgorithm,
}

/// Overrides applied on top of the network preset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    pub coinbase_maturity: Option<u64>,
    pub finality_depth: Option<u64>,
    pub undo_depth: Option<usize>,
    pub max_block_size: Option<u64>,
    pub max_future_block_time: Option<u64>,
    pub orphan_pool_size: Option<usize>,
    pub mempool_max_transactions: Option<usize>,
    /// Hex-encoded compressed keys replacing the preset federation
    pub federation: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub in_memory: bool,
    pub coin_cache_max_entries: Option<usize>,
    pub coin_cache_max_bytes: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { name: "mainnet".to_string(), algorithm: ConsensusAlgorithm::ProofOfWork }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: PathBuf::from("./data"), in_memory: false, coin_cache_max_entries: None, coin_cache_max_bytes: None }
    }
}

impl Config {
    /// Loads configuration from `path`, falling back to defaults when the file does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file {} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Overrides config values with CLI arguments
    pub fn apply_cli_overrides(&mut self, args: &crate::cli::Args) -> anyhow::Result<()> {
        if let Some(data_dir) = &args.data_dir {
            self.storage.data_dir = data_dir.clone();
        }
        if let Some(network) = &args.network {
            self.network.name = network.clone();
        }
        if let Some(algorithm) = &args.algorithm {
            self.network.algorithm = algorithm.parse().map_err(|err: String| anyhow!(err))?;
        }
        if args.in_memory {
            self.storage.in_memory = true;
        }
        Ok(())
    }

    /// Consensus parameters of the configured network with overrides applied
    pub fn params(&self) -> anyhow::Result<Params> {
        let mut params = Params::for_network(&self.network.name, self.network.algorithm)
            .ok_or_else(|| anyhow!("unknown network '{}'", self.network.name))?;

        let overrides = &self.consensus;
        if let Some(maturity) = overrides.coinbase_maturity {
            params.coinbase_maturity = maturity;
        }
        if let Some(depth) = overrides.finality_depth {
            params.finality_depth = depth;
        }
        if let Some(depth) = overrides.undo_depth {
            params.undo_depth = depth;
        }
        if let Some(size) = overrides.max_block_size {
            params.max_block_size = size;
        }
        if let Some(seconds) = overrides.max_future_block_time {
            params.max_future_block_time = seconds;
        }
        if let Some(size) = overrides.orphan_pool_size {
            params.orphan_pool_size = size;
        }
        if let Some(size) = overrides.mempool_max_transactions {
            params.mempool_max_transactions = size;
        }
        if let Some(federation) = &overrides.federation {
            params.federation = federation.clone();
        }
        if let Some(entries) = self.storage.coin_cache_max_entries {
            params.coin_cache_max_entries = entries;
        }
        if let Some(bytes) = self.storage.coin_cache_max_bytes {
            params.coin_cache_max_bytes = bytes;
        }

        if params.undo_depth < params.finality_depth as usize {
            return Err(anyhow!("undo depth {} is shallower than the finality depth {}", params.undo_depth, params.finality_depth));
        }
        Ok(params)
    }

    /// Database directory of the configured network
    pub fn chainstate_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.network.name).join(self.network.algorithm.as_str()).join("chainstate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;

    #[test]
    fn sections_override_the_preset() {
        let config = Config::parse(
            r#"
            [network]
            name = "regtest"
            algorithm = "pos"

            [consensus]
            coinbase_maturity = 5

            [storage]
            data_dir = "/tmp/chain"
            coin_cache_max_entries = 42
            "#,
        )
        .unwrap();

        let params = config.params().unwrap();
        assert_eq!(params.network, "regtest");
        assert_eq!(params.algorithm, ConsensusAlgorithm::ProofOfStake);
        assert_eq!(params.coinbase_maturity, 5);
        assert_eq!(params.coin_cache_max_entries, 42);
        assert_eq!(config.chainstate_dir(), PathBuf::from("/tmp/chain/regtest/pos/chainstate"));
    }

    #[test]
    fn empty_file_means_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.params().unwrap(), Params::mainnet(ConsensusAlgorithm::ProofOfWork));
    }

    #[test]
    fn cli_flags_win() {
        let mut config = Config::default();
        let args = Args { network: Some("regtest".into()), algorithm: Some("poa".into()), in_memory: true, ..Default::default() };
        config.apply_cli_overrides(&args).unwrap();
        assert_eq!(config.network.algorithm, ConsensusAlgorithm::ProofOfAuthority);
        assert!(config.storage.in_memory);

        let args = Args { algorithm: Some("dpos".into()), ..Default::default() };
        assert!(config.apply_cli_overrides(&args).is_err());
    }

    #[test]
    fn rejects_unknown_networks_and_short_undo_logs() {
        let mut config = Config::default();
        config.network.name = "devnet".to_string();
        assert!(config.params().is_err());

        let mut config = Config::default();
        config.consensus.undo_depth = Some(10);
        assert!(config.params().is_err());
    }
}
