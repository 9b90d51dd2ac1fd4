//! Headless engine
//!
//! Renders nothing; follows the network clock exactly as a device-backed
//! engine would. Position is `clock.now() - origin`, end-of-stream fires
//! when the position reaches the configured duration. Useful as a
//! monitoring client and as the default backend when no device is wanted.
//!
//! With no buffered media there is nothing to reposition: `seek` only
//! validates the target, and the position stays clock-derived.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    event_channel, EngineError, EngineEvent, EngineState, EventReceiver, EventSender, MediaEngine,
};
use crate::clock::NetworkClock;

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub duration: Option<Duration>,
    /// HEAD the locator during preroll when it is http(s).
    pub probe_resource: bool,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            duration: None,
            probe_resource: true,
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&unisonconf::EngineConfig> for HeadlessConfig {
    fn from(config: &unisonconf::EngineConfig) -> Self {
        Self {
            duration: config.duration(),
            probe_resource: config.probe_resource,
            poll_interval: config.poll_interval(),
            ..Self::default()
        }
    }
}

pub struct HeadlessEngine {
    config: HeadlessConfig,
    client: Client,
    locator: Option<String>,
    clock: Option<NetworkClock>,
    origin: u64,
    volume: f64,
    state: EngineState,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    cancel: CancellationToken,
    render_task: Option<JoinHandle<()>>,
}

impl HeadlessEngine {
    pub fn new(config: HeadlessConfig) -> Self {
        let (events_tx, events_rx) = event_channel();
        Self {
            config,
            client: Client::new(),
            locator: None,
            clock: None,
            origin: 0,
            volume: 1.0,
            state: EngineState::Null,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
            render_task: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    fn duration_ns(&self) -> Option<u64> {
        self.config
            .duration
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state != state {
            debug!("headless engine {:?} -> {:?}", self.state, state);
            self.state = state;
            let _ = self.events_tx.send(EngineEvent::StateChanged(state));
        }
    }

    async fn probe_resource(&self, locator: &str) -> Result<(), EngineError> {
        let is_http = locator.starts_with("http://") || locator.starts_with("https://");
        if !self.config.probe_resource || !is_http {
            return Ok(());
        }

        let response = self
            .client
            .head(locator)
            .timeout(self.config.probe_timeout)
            .send()
            .await
            .map_err(|e| EngineError::ResourceUnreachable(format!("{locator}: {e}")))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
            Ok(())
        } else {
            Err(EngineError::ResourceUnreachable(format!(
                "{locator}: HTTP {status}"
            )))
        }
    }
}

#[async_trait]
impl MediaEngine for HeadlessEngine {
    fn set_source(&mut self, locator: &str) -> Result<(), EngineError> {
        match locator.split_once("://") {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => {
                self.locator = Some(locator.to_string());
                self.set_state(EngineState::Ready);
                Ok(())
            }
            _ => Err(EngineError::InvalidSource(locator.to_string())),
        }
    }

    fn use_clock(&mut self, clock: NetworkClock) {
        self.clock = Some(clock);
    }

    fn set_timeline_origin(&mut self, base_time: u64) {
        self.origin = base_time;
    }

    fn set_volume(&mut self, level: f64) {
        self.volume = level.clamp(0.0, 1.0);
    }

    async fn preroll(&mut self) -> Result<(), EngineError> {
        let locator = self.locator.clone().ok_or_else(|| EngineError::StateChange {
            target: EngineState::Paused,
            reason: "no source set".to_string(),
        })?;
        if self.clock.is_none() {
            return Err(EngineError::StateChange {
                target: EngineState::Paused,
                reason: "no clock set".to_string(),
            });
        }

        self.probe_resource(&locator).await?;
        self.set_state(EngineState::Paused);
        Ok(())
    }

    fn duration(&self) -> Option<u64> {
        self.duration_ns()
    }

    async fn seek(&mut self, position: u64) -> Result<(), EngineError> {
        if !matches!(self.state, EngineState::Paused | EngineState::Playing) {
            return Err(EngineError::Seek {
                position,
                reason: format!("engine is {:?}", self.state),
            });
        }
        if let Some(duration) = self.duration_ns() {
            if position > duration {
                return Err(EngineError::Seek {
                    position,
                    reason: format!("past duration {duration}ns"),
                });
            }
        }

        debug!(position, "seek accepted, position follows the clock");
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Paused {
            return Err(EngineError::StateChange {
                target: EngineState::Playing,
                reason: format!("engine is {:?}", self.state),
            });
        }
        let clock = self.clock.clone().ok_or_else(|| EngineError::StateChange {
            target: EngineState::Playing,
            reason: "no clock set".to_string(),
        })?;

        let origin = self.origin;
        let duration = self.duration_ns();
        let poll_interval = self.config.poll_interval;
        let events = self.events_tx.clone();
        let cancel = self.cancel.child_token();

        info!(
            locator = self.locator.as_deref().unwrap_or_default(),
            origin,
            volume = self.volume,
            "headless playback starting"
        );

        self.render_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let position = clock.now().saturating_sub(origin);
                        if duration.is_some_and(|d| position >= d) {
                            debug!(position, "headless engine reached end of stream");
                            let _ = events.send(EngineEvent::EndOfStream);
                            break;
                        }
                    }
                }
            }
        }));

        self.set_state(EngineState::Playing);
        Ok(())
    }

    fn take_events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.render_task.take() {
            if let Err(e) = task.await {
                warn!("headless render task ended abnormally: {}", e);
            }
        }
        self.set_state(EngineState::Null);
    }
}

impl Drop for HeadlessEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
