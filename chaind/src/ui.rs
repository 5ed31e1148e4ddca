//! Console output helpers

use std::fmt;
use std::time::Duration;

use consensus_core::Hash;

/// ANSI color codes for terminal output
pub mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";

    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const BRIGHT_GREEN: &str = "\x1b[92m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const BRIGHT_CYAN: &str = "\x1b[96m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
}

pub fn print_banner(version: &str, network: &str, algorithm: &str) {
    println!();
    println!("{}╔══════════════════════════════════════════════════════════════╗{}", colors::BRIGHT_CYAN, colors::RESET);
    println!(
        "{}║{}  {}CHAIND v{:<52}{}{}║{}",
        colors::BRIGHT_CYAN,
        colors::RESET,
        colors::BOLD,
        version,
        colors::RESET,
        colors::BRIGHT_CYAN,
        colors::RESET
    );
    println!(
        "{}║{}  Network: {}{:<51}{}{}║{}",
        colors::BRIGHT_CYAN,
        colors::RESET,
        colors::BRIGHT_GREEN,
        format!("{network} ({algorithm})"),
        colors::RESET,
        colors::BRIGHT_CYAN,
        colors::RESET
    );
    println!("{}╚══════════════════════════════════════════════════════════════╝{}", colors::BRIGHT_CYAN, colors::RESET);
    println!();
}

/// Print status line with icon and color
pub fn print_status(icon: &str, message: &str, status: StatusType) {
    let color = match status {
        StatusType::Success => colors::BRIGHT_GREEN,
        StatusType::Info => colors::BRIGHT_CYAN,
        StatusType::Warning => colors::BRIGHT_YELLOW,
        StatusType::Error => colors::BRIGHT_RED,
    };
    println!("{}[{}]{} {}{}{}", color, icon, colors::RESET, color, message, colors::RESET);
}

#[derive(Debug, Clone, Copy)]
pub enum StatusType {
    Success,
    Info,
    Warning,
    Error,
}

pub fn print_section(title: &str) {
    println!();
    println!("{}━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━{}", colors::DIM, colors::RESET);
    println!("{}  {}{}{}", colors::BRIGHT_CYAN, colors::BOLD, title, colors::RESET);
    println!("{}━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━{}", colors::DIM, colors::RESET);
    println!();
}

pub fn print_kv(key: &str, value: &str) {
    println!("  {}{}:{} {}{}{}", colors::BRIGHT_WHITE, key, colors::RESET, colors::BRIGHT_CYAN, value, colors::RESET);
}

pub fn print_config_summary(config: &crate::config::Config) {
    print_section("Configuration");
    print_kv("Network", &config.network.name);
    print_kv("Algorithm", config.network.algorithm.as_str());
    if config.storage.in_memory {
        print_kv("Chain State", "in memory");
    } else {
        print_kv("Chain State", &config.chainstate_dir().display().to_string());
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// Periodic chain state summary
pub struct ChainStatus {
    pub uptime: Duration,
    pub tip_height: u64,
    pub tip_hash: Hash,
    pub best_header_height: u64,
    pub orphans: usize,
    pub mempool_size: usize,
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}  Chain Status{}", colors::BRIGHT_CYAN, colors::RESET)?;
        writeln!(f, "  {}Uptime:{}    {}", colors::BRIGHT_WHITE, colors::RESET, format_duration(self.uptime))?;
        writeln!(f, "  {}Tip:{}       {} ({})", colors::BRIGHT_WHITE, colors::RESET, self.tip_height, self.tip_hash)?;
        writeln!(f, "  {}Headers:{}   {}", colors::BRIGHT_WHITE, colors::RESET, self.best_header_height)?;
        writeln!(f, "  {}Orphans:{}   {}", colors::BRIGHT_WHITE, colors::RESET, self.orphans)?;
        writeln!(f, "  {}Mempool:{}   {} transactions", colors::BRIGHT_WHITE, colors::RESET, self.mempool_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }
}
