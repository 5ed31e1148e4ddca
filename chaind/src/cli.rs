use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Default)]
#[command(name = "chaind")]
#[command(about = "Chain-state node daemon", long_about = None)]
pub struct Args {
    /// Path to configuration file (optional, uses defaults if not provided)
    #[arg(short, long)]
    pub config_path: Option<PathBuf>,

    /// Data directory
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,

    /// Network preset (mainnet, regtest)
    #[arg(short, long)]
    pub network: Option<String>,

    /// Consensus algorithm (pow, pos, poa)
    #[arg(short, long)]
    pub algorithm: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// JSON lines file of blocks to import on startup
    #[arg(short, long)]
    pub import: Option<PathBuf>,

    /// Exit once the import finishes instead of waiting for Ctrl+C
    #[arg(long)]
    pub exit_after_import: bool,

    /// Keep the chain state in memory only
    #[arg(long)]
    pub in_memory: bool,
}

pub fn parse_args() -> Args {
    Args::parse()
}
