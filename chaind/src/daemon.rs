use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use consensus::{ChainEvent, ConsensusManager, ConsensusStorage, Mempool, SubmitOutcome};
use consensus_core::block::Block;
use consensus_core::errors::ConsensusError;
use database::Database;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::ui;

const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Where the blocks of an import file ended up
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub connected: usize,
    pub side_branch: usize,
    pub orphaned: usize,
    pub stale: usize,
    pub duplicate: usize,
    pub rejected: usize,
}

pub struct Daemon {
    config: Config,
    consensus: Arc<ConsensusManager>,
    mempool: Arc<Mempool>,
}

impl Daemon {
    /// Opens the chain state and builds the engine for the configured network
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let params = config.params()?;
        let storage = if config.storage.in_memory {
            info!("keeping chain state in memory");
            ConsensusStorage::in_memory()
        } else {
            let dir = config.chainstate_dir();
            fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
            info!("opening chain state at {}", dir.display());
            let db = Database::open(&dir).with_context(|| format!("failed to open database at {}", dir.display()))?;
            ConsensusStorage::rocksdb(Arc::new(db))
        };

        let consensus = Arc::new(ConsensusManager::new(params, storage).context("failed to start the consensus engine")?);
        let tip = consensus.get_best_tip();
        info!("{} {} chain at height {} (tip {})", config.network.name, config.network.algorithm, tip.height, tip.hash);
        let mempool = Arc::new(Mempool::new(consensus.clone()));
        Ok(Self { config, consensus, mempool })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn consensus(&self) -> &Arc<ConsensusManager> {
        &self.consensus
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    /// Submits every block of a JSON lines file in order. Rejected blocks are
    /// logged and skipped; a fatal chain state fault aborts the import.
    pub fn import_blocks(&self, path: &Path) -> anyhow::Result<ImportSummary> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut summary = ImportSummary::default();

        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line_number = index + 1;
            let line = line.with_context(|| format!("failed to read {}:{}", path.display(), line_number))?;
            if line.trim().is_empty() {
                continue;
            }
            let block: Block = serde_json::from_str(&line).with_context(|| format!("{}:{}: malformed block", path.display(), line_number))?;
            let hash = block.hash();

            match self.consensus.submit_block(block) {
                Ok(SubmitOutcome::Connected) => summary.connected += 1,
                Ok(SubmitOutcome::SideBranch) => summary.side_branch += 1,
                Ok(SubmitOutcome::Orphan) => summary.orphaned += 1,
                Ok(SubmitOutcome::Stale) => summary.stale += 1,
                Err(ConsensusError::Duplicate(_)) => summary.duplicate += 1,
                Err(err) if err.is_fatal() => {
                    error!("fatal fault importing block {} from line {}: {}", hash, line_number, err);
                    return Err(err).context("chain state is no longer consistent");
                }
                Err(err) => {
                    warn!("block {} from line {} rejected: {}", hash, line_number, err);
                    summary.rejected += 1;
                }
            }
        }

        info!(
            "imported {}: {} connected, {} side branch, {} orphaned, {} stale, {} duplicate, {} rejected",
            path.display(),
            summary.connected,
            summary.side_branch,
            summary.orphaned,
            summary.stale,
            summary.duplicate,
            summary.rejected
        );
        Ok(summary)
    }

    /// Runs until Ctrl+C, or until the import finishes when `exit_after_import` is set
    pub async fn run(self, import: Option<PathBuf>, exit_after_import: bool) -> anyhow::Result<()> {
        ui::print_section("Running");
        let start_time = Instant::now();

        let event_logger = tokio::spawn(log_events(self.consensus.subscribe()));
        let mempool_follower = {
            let mempool = self.mempool.clone();
            let events = self.consensus.subscribe();
            tokio::spawn(async move { mempool.follow_chain(events).await })
        };
        let status_reporter = {
            let consensus = self.consensus.clone();
            let mempool = self.mempool.clone();
            tokio::spawn(async move {
                let mut interval = interval(STATUS_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let tip = consensus.get_best_tip();
                    let status = ui::ChainStatus {
                        uptime: start_time.elapsed(),
                        tip_height: tip.height,
                        tip_hash: tip.hash,
                        best_header_height: consensus.best_header().height,
                        orphans: consensus.orphan_count(),
                        mempool_size: mempool.len(),
                    };
                    print!("{}", status);
                }
            })
        };

        let result = self.serve(import, exit_after_import).await;

        status_reporter.abort();
        mempool_follower.abort();
        event_logger.abort();
        self.consensus.flush().context("failed to flush the coin view")?;
        info!("chain state flushed at height {}", self.consensus.get_best_tip().height);
        result
    }

    async fn serve(&self, import: Option<PathBuf>, exit_after_import: bool) -> anyhow::Result<()> {
        if let Some(path) = &import {
            let summary = tokio::task::block_in_place(|| self.import_blocks(path))?;
            ui::print_status(
                "✓",
                &format!("Imported {} blocks ({} rejected)", summary.connected + summary.side_branch, summary.rejected),
                ui::StatusType::Success,
            );
            if exit_after_import {
                return Ok(());
            }
        }

        ui::print_status("ℹ", "Press Ctrl+C to stop the daemon", ui::StatusType::Info);
        signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
        ui::print_status("ℹ", "Received Ctrl+C, shutting down gracefully...", ui::StatusType::Warning);
        info!("received Ctrl+C, shutting down");
        Ok(())
    }
}

async fn log_events(mut events: broadcast::Receiver<ChainEvent>) {
    loop {
        match events.recv().await {
            Ok(ChainEvent::BlockConnected { correlation_id, hash, height, .. }) => {
                info!("connected block {} at height {} [{}]", hash, height, correlation_id)
            }
            Ok(ChainEvent::BlockDisconnected { correlation_id, hash, height, new_tip, .. }) => {
                info!("disconnected block {} at height {}, tip back to {} [{}]", hash, height, new_tip, correlation_id)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => warn!("event logger missed {} chain events", skipped),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
