use std::process;

use chaind::{cli, ui, Config, Daemon};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = cli::parse_args();
    init_logging(&args);

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            ui::print_status("✗", &format!("Invalid configuration: {err:#}"), ui::StatusType::Error);
            process::exit(2);
        }
    };

    ui::print_banner(env!("CARGO_PKG_VERSION"), &config.network.name, config.network.algorithm.as_str());
    ui::print_config_summary(&config);

    let daemon = match Daemon::new(config) {
        Ok(daemon) => daemon,
        Err(err) => {
            ui::print_status("✗", &format!("Failed to initialize daemon: {err:#}"), ui::StatusType::Error);
            error!("failed to initialize daemon: {:#}", err);
            process::exit(1);
        }
    };

    if let Err(err) = daemon.run(args.import.clone(), args.exit_after_import).await {
        ui::print_status("✗", &format!("Daemon error: {err:#}"), ui::StatusType::Error);
        error!("daemon error: {:#}", err);
        process::exit(1);
    }

    ui::print_status("✓", "chaind stopped gracefully", ui::StatusType::Success);
    info!("chaind stopped gracefully");
}

fn load_config(args: &cli::Args) -> anyhow::Result<Config> {
    let mut config = match &args.config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_cli_overrides(args)?;
    Ok(config)
}

fn init_logging(args: &cli::Args) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt().with_env_filter(filter).with_target(true).with_thread_ids(true).init();
}
