//! unison-clock-probe: watch a NetworkClock follow a time provider.
//!
//! Prints `local<TAB>network<TAB>difference<TAB>rtt` (all ns) whenever the
//! calibration changes.

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use unison::clock::{ClockEstimate, NetworkClock, SyncConfig};
use unison::telemetry;

#[derive(Parser, Debug)]
#[command(version, about = "Print network clock calibration changes", long_about = None)]
struct Cli {
    /// Time provider host
    server: String,

    /// Time provider UDP port
    port: u16,

    /// How often to check the calibration
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Probe interval; defaults to the client's
    #[arg(long)]
    sync_interval_ms: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_level.as_deref(), "warn")?;

    let mut sync = SyncConfig::default();
    if let Some(ms) = cli.sync_interval_ms {
        sync.interval = Duration::from_millis(ms.max(1));
    }

    let cancel = CancellationToken::new();
    let clock = NetworkClock::new(cli.server, cli.port, 0);
    let task = clock.start_sync(sync, &cancel);

    let mut ticker = tokio::time::interval(Duration::from_millis(cli.interval_ms.max(1)));
    let mut last: Option<ClockEstimate> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let estimate = clock.estimate();
                if last != Some(estimate) {
                    last = Some(estimate);
                    print_calibration(&clock, &estimate);
                }
            }
        }
    }

    task.shutdown().await;
    Ok(())
}

fn print_calibration(clock: &NetworkClock, estimate: &ClockEstimate) {
    let local = clock.local_clock().now();
    let network = clock.now();
    let difference = i128::from(network) - i128::from(local);
    let rtt = estimate
        .round_trip
        .map_or_else(|| "-".to_string(), |rtt| rtt.to_string());
    println!("{local}\t{network}\t{difference}\t{rtt}");
}
