//! Session context fetch
//!
//! The controller publishes the current session at
//! `http://{controller}:5457/control` as a JSON object. One fetch happens
//! per session; the result is read-only afterwards.

use std::borrow::Cow;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("controller unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("controller at {url} did not answer within {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("controller at {url} answered with HTTP {status}")]
    Rejected { url: String, status: u16 },

    #[error("malformed session context: {0}")]
    MalformedContext(String),
}

/// Immutable snapshot of the controller's session.
///
/// `base_time` and `current_time` are in the network clock's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub clock_host: String,
    pub clock_port: u16,
    pub base_time: u64,
    pub current_time: u64,
    pub resource_protocol: String,
    pub resource_host: String,
    pub resource_port: u16,
    pub resource_path: String,
    /// Linear volume 0.0..=1.0 when the controller sets one.
    pub volume_level: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ControlResponse {
    clock_port: u16,
    base_time: u64,
    current_time: u64,
    resource_protocol: String,
    resource_port: u16,
    resource_path: String,
    #[serde(default)]
    volume_level: Option<f64>,
}

impl SessionContext {
    /// Parse a control response body. Clock and resource hosts are `controller`.
    pub fn from_json(controller: &str, body: &[u8]) -> Result<Self, FetchError> {
        let response: ControlResponse = serde_json::from_slice(body)
            .map_err(|e| FetchError::MalformedContext(e.to_string()))?;

        if response.resource_protocol.is_empty() {
            return Err(FetchError::MalformedContext(
                "resource-protocol is empty".to_string(),
            ));
        }
        if let Some(level) = response.volume_level {
            if !(0.0..=1.0).contains(&level) {
                return Err(FetchError::MalformedContext(format!(
                    "volume-level out of range: {level}"
                )));
            }
        }

        Ok(Self {
            clock_host: controller.to_string(),
            clock_port: response.clock_port,
            base_time: response.base_time,
            current_time: response.current_time,
            resource_protocol: response.resource_protocol,
            resource_host: controller.to_string(),
            resource_port: response.resource_port,
            resource_path: response.resource_path,
            volume_level: response.volume_level,
        })
    }

    /// `{protocol}://{host}:{port}{path}`
    pub fn media_locator(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.resource_protocol,
            url_host(&self.resource_host),
            self.resource_port,
            self.resource_path
        )
    }
}

/// Bracket IPv6 literals for use in a URL authority.
pub fn url_host(host: &str) -> Cow<'_, str> {
    if host.contains(':') && !host.starts_with('[') {
        Cow::Owned(format!("[{host}]"))
    } else {
        Cow::Borrowed(host)
    }
}

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub port: u16,
    pub timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            port: 5457,
            timeout: Duration::from_secs(5),
        }
    }
}

impl From<&unisonconf::ControlConfig> for FetchConfig {
    fn from(config: &unisonconf::ControlConfig) -> Self {
        Self {
            port: config.port,
            timeout: config.timeout(),
        }
    }
}

/// Client for the controller's control endpoint. No retries.
#[derive(Debug, Clone)]
pub struct ContextFetcher {
    client: Client,
    config: FetchConfig,
}

impl ContextFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn control_url(&self, controller: &str) -> String {
        format!("http://{}:{}/control", url_host(controller), self.config.port)
    }

    /// Fetch and parse the session context from `controller`.
    pub async fn fetch(&self, controller: &str) -> Result<SessionContext, FetchError> {
        let url = self.control_url(controller);
        debug!("fetching session context from {}", url);

        let response = self
            .client
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
            .map_err(|e| self.classify(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Rejected {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| self.classify(&url, e))?;
        SessionContext::from_json(controller, &body)
    }

    fn classify(&self, url: &str, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
                after: self.config.timeout,
            }
        } else {
            FetchError::Unreachable {
                url: url.to_string(),
                message: error.to_string(),
            }
        }
    }
}
