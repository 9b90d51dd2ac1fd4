//! Configuration sections.
//!
//! Durations are stored as integer milliseconds so they read naturally in
//! TOML; each section exposes `Duration` accessors for callers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Controller control-plane endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Port of the controller's HTTP control endpoint.
    /// Default: 5457
    #[serde(default = "ControlConfig::default_port")]
    pub port: u16,

    /// Deadline for the context fetch.
    /// Default: 5000
    #[serde(default = "ControlConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl ControlConfig {
    fn default_port() -> u16 {
        5457
    }

    fn default_timeout_ms() -> u64 {
        5000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Network clock synchronization settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Interval between round-trip probes.
    /// Default: 2000
    #[serde(default = "ClockConfig::default_sync_interval_ms")]
    pub sync_interval_ms: u64,

    /// How long a single probe waits for its reply.
    /// Default: 1000
    #[serde(default = "ClockConfig::default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Consecutive probe failures before sync is reported degraded.
    /// Default: 3
    #[serde(default = "ClockConfig::default_degraded_after")]
    pub degraded_after: u32,

    /// Samples with an rtt above `outlier_factor` x average rtt are dropped.
    /// Default: 2
    #[serde(default = "ClockConfig::default_outlier_factor")]
    pub outlier_factor: u32,
}

impl ClockConfig {
    fn default_sync_interval_ms() -> u64 {
        2000
    }

    fn default_probe_timeout_ms() -> u64 {
        1000
    }

    fn default_degraded_after() -> u32 {
        3
    }

    fn default_outlier_factor() -> u32 {
        2
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: Self::default_sync_interval_ms(),
            probe_timeout_ms: Self::default_probe_timeout_ms(),
            degraded_after: Self::default_degraded_after(),
            outlier_factor: Self::default_outlier_factor(),
        }
    }
}

/// Start alignment and session supervision settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Offsets at or below this are caught up by the engine instead of seeked.
    /// 0 seeks on any positive offset; 500 tolerates small joins in place.
    /// Default: 0
    #[serde(default = "PlaybackConfig::default_seek_threshold_ms")]
    pub seek_threshold_ms: u64,

    /// Period of the clock diagnostic log line while playing.
    /// Default: 5000
    #[serde(default = "PlaybackConfig::default_diagnostic_interval_ms")]
    pub diagnostic_interval_ms: u64,
}

impl PlaybackConfig {
    fn default_seek_threshold_ms() -> u64 {
        0
    }

    fn default_diagnostic_interval_ms() -> u64 {
        5000
    }

    pub fn seek_threshold(&self) -> Duration {
        Duration::from_millis(self.seek_threshold_ms)
    }

    pub fn diagnostic_interval(&self) -> Duration {
        Duration::from_millis(self.diagnostic_interval_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            seek_threshold_ms: Self::default_seek_threshold_ms(),
            diagnostic_interval_ms: Self::default_diagnostic_interval_ms(),
        }
    }
}

/// Built-in headless engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Media duration, when known out of band. Unset means play until stopped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Issue a HEAD request against http(s) locators during preroll.
    /// Default: true
    #[serde(default = "EngineConfig::default_probe_resource")]
    pub probe_resource: bool,

    /// How often the engine checks its position against the timeline.
    /// Default: 50
    #[serde(default = "EngineConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl EngineConfig {
    fn default_probe_resource() -> bool {
        true
    }

    fn default_poll_interval_ms() -> u64 {
        50
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            duration_ms: None,
            probe_resource: Self::default_probe_resource(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
