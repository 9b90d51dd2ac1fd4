//! Layered configuration loading for unison.
//!
//! Kept free of logging and async dependencies: the binaries load config
//! before tracing is installed, and the log level itself comes from here.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, merged key by key):
//! 1. `/etc/unison/config.toml` (system)
//! 2. `~/.config/unison/config.toml` (user)
//! 3. `./unison.toml` (local override, replaced by `--config <path>`)
//! 4. Environment variables (`UNISON_*`)
//!
//! # Example Config
//!
//! ```toml
//! [control]
//! port = 5457
//! timeout_ms = 5000
//!
//! [clock]
//! sync_interval_ms = 2000
//! probe_timeout_ms = 1000
//!
//! [playback]
//! seek_threshold_ms = 0
//!
//! [engine]
//! duration_ms = 215000
//!
//! [telemetry]
//! log_level = "info"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{ClockConfig, ControlConfig, EngineConfig, PlaybackConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete unison configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UnisonConfig {
    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub clock: ClockConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl UnisonConfig {
    /// Load configuration with `config_path` replacing the local override.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and variables contributed.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let table = loader::load_table_from_file(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config: UnisonConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: PathBuf::from("<merged>"),
                message: e.to_string(),
            })?;

        loader::apply_env_overrides(&mut config, &mut sources);
        config.validate()?;

        Ok((config, sources))
    }

    /// Reject values that would stall or spin the client.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let zero_checks = [
            ("control.timeout_ms", self.control.timeout_ms),
            ("clock.sync_interval_ms", self.clock.sync_interval_ms),
            ("clock.probe_timeout_ms", self.clock.probe_timeout_ms),
            ("playback.diagnostic_interval_ms", self.playback.diagnostic_interval_ms),
            ("engine.poll_interval_ms", self.engine.poll_interval_ms),
        ];
        for (name, value) in zero_checks {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        if self.clock.outlier_factor < 1 {
            return Err(ConfigError::Invalid(
                "clock.outlier_factor must be at least 1".to_string(),
            ));
        }
        if self.clock.degraded_after == 0 {
            return Err(ConfigError::Invalid(
                "clock.degraded_after must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# unison configuration\n\n");

        output.push_str("[control]\n");
        output.push_str(&format!("port = {}\n", self.control.port));
        output.push_str(&format!("timeout_ms = {}\n", self.control.timeout_ms));

        output.push_str("\n[clock]\n");
        output.push_str(&format!("sync_interval_ms = {}\n", self.clock.sync_interval_ms));
        output.push_str(&format!("probe_timeout_ms = {}\n", self.clock.probe_timeout_ms));
        output.push_str(&format!("degraded_after = {}\n", self.clock.degraded_after));
        output.push_str(&format!("outlier_factor = {}\n", self.clock.outlier_factor));

        output.push_str("\n[playback]\n");
        output.push_str(&format!(
            "seek_threshold_ms = {}\n",
            self.playback.seek_threshold_ms
        ));
        output.push_str(&format!(
            "diagnostic_interval_ms = {}\n",
            self.playback.diagnostic_interval_ms
        ));

        output.push_str("\n[engine]\n");
        match self.engine.duration_ms {
            Some(ms) => output.push_str(&format!("duration_ms = {}\n", ms)),
            None => output.push_str("# duration_ms = (unknown)\n"),
        }
        output.push_str(&format!("probe_resource = {}\n", self.engine.probe_resource));
        output.push_str(&format!("poll_interval_ms = {}\n", self.engine.poll_interval_ms));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = UnisonConfig::default();
        assert_eq!(config.control.port, 5457);
        assert_eq!(config.playback.seek_threshold_ms, 0);
        assert_eq!(config.engine.duration_ms, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = UnisonConfig::default();
        config.engine.duration_ms = Some(42_000);
        config.telemetry.log_level = "debug".to_string();

        let rendered = config.to_toml();
        assert!(rendered.contains("[control]"));
        assert!(rendered.contains("duration_ms = 42000"));

        let parsed: UnisonConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[control]\nport = 6001\n\n[clock]\nsync_interval_ms = 250").unwrap();

        let (config, sources) = UnisonConfig::load_with_sources_from(Some(file.path())).unwrap();
        assert_eq!(config.control.port, 6001);
        assert_eq!(config.clock.sync_interval_ms, 250);
        assert_eq!(config.clock.probe_timeout_ms, 1000);
        assert!(sources.files.iter().any(|p| p == file.path()));
    }

    #[test]
    fn test_zero_interval_is_invalid() {
        let mut config = UnisonConfig::default();
        config.clock.sync_interval_ms = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unreadable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let err = loader::load_table_from_file(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
