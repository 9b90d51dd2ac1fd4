//! Config file discovery, table merging, and environment variable overlay.

use crate::{ConfigError, UnisonConfig};
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in load order (system, user, local).
///
/// Only returns files that exist. If `cli_path` is provided and exists,
/// it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/unison/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("unison/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("unison.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a config file as a raw TOML table.
///
/// The table is also deserialized on its own so a type error names the
/// file it came from rather than the merged result.
pub fn load_table_from_file(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_table(&contents, path)
}

pub(crate) fn parse_table(contents: &str, path: &Path) -> Result<toml::Table, ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    toml::Value::Table(table.clone())
        .try_into::<UnisonConfig>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    Ok(table)
}

/// Merge `overlay` into `base` key by key; nested tables merge recursively.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply `UNISON_*` environment variable overrides from the process env.
pub fn apply_env_overrides(config: &mut UnisonConfig, sources: &mut ConfigSources) {
    apply_overrides_from(config, sources, |name| std::env::var(name).ok());
}

/// Apply overrides using `lookup` to resolve variable names.
///
/// Values that fail to parse are skipped.
pub fn apply_overrides_from<F>(config: &mut UnisonConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    fn parsed<T: std::str::FromStr>(
        lookup: &dyn Fn(&str) -> Option<String>,
        name: &str,
    ) -> Option<T> {
        lookup(name).and_then(|v| v.trim().parse().ok())
    }

    if let Some(port) = parsed(&lookup, "UNISON_CONTROL_PORT") {
        config.control.port = port;
        sources.env_overrides.push("UNISON_CONTROL_PORT".to_string());
    }
    if let Some(ms) = parsed(&lookup, "UNISON_CONTROL_TIMEOUT_MS") {
        config.control.timeout_ms = ms;
        sources.env_overrides.push("UNISON_CONTROL_TIMEOUT_MS".to_string());
    }
    if let Some(ms) = parsed(&lookup, "UNISON_SYNC_INTERVAL_MS") {
        config.clock.sync_interval_ms = ms;
        sources.env_overrides.push("UNISON_SYNC_INTERVAL_MS".to_string());
    }
    if let Some(ms) = parsed(&lookup, "UNISON_PROBE_TIMEOUT_MS") {
        config.clock.probe_timeout_ms = ms;
        sources.env_overrides.push("UNISON_PROBE_TIMEOUT_MS".to_string());
    }
    if let Some(ms) = parsed(&lookup, "UNISON_SEEK_THRESHOLD_MS") {
        config.playback.seek_threshold_ms = ms;
        sources.env_overrides.push("UNISON_SEEK_THRESHOLD_MS".to_string());
    }
    if let Some(ms) = parsed(&lookup, "UNISON_DURATION_MS") {
        config.engine.duration_ms = Some(ms);
        sources.env_overrides.push("UNISON_DURATION_MS".to_string());
    }
    if let Some(level) = lookup("UNISON_LOG_LEVEL") {
        config.telemetry.log_level = level;
        sources.env_overrides.push("UNISON_LOG_LEVEL".to_string());
    }
}
