//! Log output for the binaries.
//!
//! Filter precedence: `RUST_LOG`, then the `--log-level` flag, then
//! `[telemetry] log_level` from config.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const FALLBACK_LEVEL: &str = "info";

/// Pick the filter directive when `RUST_LOG` is not set.
pub fn directive(cli_level: Option<&str>, config_level: &str) -> String {
    cli_level
        .filter(|level| !level.trim().is_empty())
        .or(Some(config_level).filter(|level| !level.trim().is_empty()))
        .unwrap_or(FALLBACK_LEVEL)
        .to_string()
}

fn build_filter(cli_level: Option<&str>, config_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(directive(cli_level, config_level))
            .unwrap_or_else(|_| EnvFilter::new(FALLBACK_LEVEL))
    })
}

/// Install the global fmt subscriber.
pub fn init(cli_level: Option<&str>, config_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(build_filter(cli_level, config_level))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_config() {
        assert_eq!(directive(Some("debug"), "warn"), "debug");
    }

    #[test]
    fn config_used_without_flag() {
        assert_eq!(directive(None, "unison=trace"), "unison=trace");
    }

    #[test]
    fn blank_values_fall_back_to_info() {
        assert_eq!(directive(Some(" "), ""), "info");
    }
}
