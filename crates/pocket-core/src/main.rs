//! pockettrader core: two-venue arbitrage execution core.
//!
//! Usage:
//!   pocket-core [OPTIONS]
//!
//! Options:
//!   --exa-port N        EXA feed UDP port (default: 6001)
//!   --exb-port N        EXB feed UDP port (default: 6002)
//!   --trade-port N      Trade datagram port (default: 7000)
//!   --trade-host ADDR   Fixed trade-sink IP (default: learned from feeds)
//!   --config FILE       Optional TOML tuning file
//!   --log-level LEVEL   trace|debug|info|warn|error (default: info)
//!
//! Unknown flags are ignored. Exit code 0 on clean shutdown, nonzero on a
//! fatal init error.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use pocket_core::config::{
    CoreConfig, DEFAULT_EXA_PORT, DEFAULT_EXB_PORT, DEFAULT_TRADE_PORT,
};

/// CLI arguments for the core.
#[derive(Parser, Debug)]
#[command(name = "pocket-core")]
#[command(about = "Two-venue arbitrage execution core")]
#[command(ignore_errors = true)]
struct Args {
    /// EXA feed UDP port.
    #[arg(long, default_value_t = DEFAULT_EXA_PORT)]
    exa_port: u16,

    /// EXB feed UDP port.
    #[arg(long, default_value_t = DEFAULT_EXB_PORT)]
    exb_port: u16,

    /// Destination port for trade datagrams.
    #[arg(long, default_value_t = DEFAULT_TRADE_PORT)]
    trade_port: u16,

    /// Fixed trade-sink IP; skips learning it from the first feed packet.
    #[arg(long)]
    trade_host: Option<IpAddr>,

    /// Optional TOML tuning file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level filter.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    // `ignore_errors` (needed so unknown flags are ignored rather than
    // fatal) also swallows the built-in help flag, so handle it up front.
    if std::env::args().skip(1).any(|arg| arg == "-h" || arg == "--help") {
        let _ = Args::command().print_help();
        return ExitCode::SUCCESS;
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => CoreConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => CoreConfig::default(),
    };
    config.apply_cli_overrides(
        args.exa_port,
        args.exb_port,
        args.trade_port,
        args.trade_host,
        args.log_level,
    );

    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    // All diagnostics go to stderr; stdout stays silent in the hot path.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("set global tracing subscriber")?;

    config.validate().context("configuration validation failed")?;

    info!("starting pockettrader core");
    pocket_core::runtime::run(config)
}
