//! unison: play the controller's current session in sync with every other
//! client on the network.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use unison::engine::{HeadlessConfig, HeadlessEngine};
use unison::session::{MediaSession, SessionConfig};
use unison::telemetry;
use unisonconf::UnisonConfig;

#[derive(Parser, Debug)]
#[command(version, about = "Synchronized media playback client", long_about = None)]
struct Cli {
    /// Controller host name or address
    controller: String,

    /// Config file to use instead of ./unison.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "unison=trace" (RUST_LOG wins)
    #[arg(long)]
    log_level: Option<String>,

    /// Controller control port
    #[arg(long)]
    control_port: Option<u16>,

    /// Media duration in milliseconds, when the engine cannot tell
    #[arg(long)]
    duration_ms: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("unison: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config =
        UnisonConfig::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.control_port {
        config.control.port = port;
    }
    if let Some(ms) = cli.duration_ms {
        config.engine.duration_ms = Some(ms);
    }
    config.validate().context("Invalid command line overrides")?;

    if cli.print_config {
        print!("{}", config.to_toml());
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init(cli.log_level.as_deref(), &config.telemetry.log_level)?;

    let engine = HeadlessEngine::new(HeadlessConfig::from(&config.engine));
    let session = MediaSession::new(cli.controller, SessionConfig::from(&config), engine);

    let cancel = CancellationToken::new();
    let signals = tokio::spawn(forward_signals(cancel.clone()));

    let result = session.run(cancel).await;
    signals.abort();

    match result {
        Ok(report) => {
            info!(
                end = ?report.end,
                syncs = report.sync.successes,
                failed_syncs = report.sync.total_failures,
                "done"
            );
            Ok(ExitCode::SUCCESS)
        }
        // Already logged by the session
        Err(e) => Ok(ExitCode::from(e.exit_code())),
    }
}

/// Cancel on SIGINT or SIGTERM.
async fn forward_signals(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT, stopping playback");
        }
        _ = sigterm() => {
            info!("Received SIGTERM, stopping playback");
        }
    }
    cancel.cancel();
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to install SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    std::future::pending::<()>().await;
}
