//! Session orchestration
//!
//! [`MediaSession`] owns the playback state machine. It fetches the session
//! context, slaves a [`NetworkClock`] to the controller's time provider,
//! aligns the engine to `base_time`, then supervises until end-of-stream,
//! an engine error or cancellation.
//!
//! Every exit path goes through one teardown: the sync task is stopped and
//! the engine shut down before the final state is published.

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::align::{compute_start_offset, PlaybackAligner, SessionExpired};
use crate::clock::{NetworkClock, SyncConfig, SyncStats, SyncTask};
use crate::context::{ContextFetcher, FetchConfig, FetchError, SessionContext};
use crate::engine::{EngineError, EngineEvent, EngineState, MediaEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaybackState {
    Idle,
    Starting,
    Playing,
    Stopping,
    Stopped,
    Errored,
}

impl PlaybackState {
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Idle, Starting | Stopped | Errored)
                | (Starting, Playing | Stopping | Errored)
                | (Playing, Stopping | Stopped | Errored)
                | (Stopping, Stopped | Errored)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Stopped | PlaybackState::Errored)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Starting => "starting",
            PlaybackState::Playing => "playing",
            PlaybackState::Stopping => "stopping",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Errored => "errored",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Expired(#[from] SessionExpired),

    #[error("media engine failed: {0}")]
    Engine(#[from] EngineError),

    #[error("invalid playback transition {from} -> {to}")]
    InvalidTransition {
        from: PlaybackState,
        to: PlaybackState,
    },
}

impl SessionError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            SessionError::Fetch(_) => 2,
            SessionError::Expired(_) => 3,
            SessionError::Engine(_) => 4,
            SessionError::InvalidTransition { .. } => 1,
        }
    }
}

/// Why a session ended cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    EndOfStream,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub end: SessionEnd,
    /// Every state the session passed through, starting with `Idle`.
    pub history: Vec<PlaybackState>,
    pub sync: SyncStats,
    /// The clock sync task had finished when the report was made.
    pub sync_task_stopped: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub fetch: FetchConfig,
    pub sync: SyncConfig,
    pub seek_threshold: Duration,
    pub diagnostic_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            sync: SyncConfig::default(),
            seek_threshold: Duration::ZERO,
            diagnostic_interval: Duration::from_secs(5),
        }
    }
}

impl From<&unisonconf::UnisonConfig> for SessionConfig {
    fn from(config: &unisonconf::UnisonConfig) -> Self {
        Self {
            fetch: FetchConfig::from(&config.control),
            sync: SyncConfig::from(&config.clock),
            seek_threshold: config.playback.seek_threshold(),
            diagnostic_interval: config.playback.diagnostic_interval(),
        }
    }
}

/// Resources acquired once the context is known; released in teardown.
struct Synced {
    clock: NetworkClock,
    task: SyncTask,
}

/// One playback attempt against one controller.
pub struct MediaSession<E: MediaEngine> {
    controller: String,
    config: SessionConfig,
    engine: E,
    state: PlaybackState,
    history: Vec<PlaybackState>,
    state_tx: watch::Sender<PlaybackState>,
}

impl<E: MediaEngine> MediaSession<E> {
    pub fn new(controller: impl Into<String>, config: SessionConfig, engine: E) -> Self {
        let (state_tx, _) = watch::channel(PlaybackState::Idle);
        Self {
            controller: controller.into(),
            config,
            engine,
            state: PlaybackState::Idle,
            history: vec![PlaybackState::Idle],
            state_tx,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Watch state changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<PlaybackState> {
        self.state_tx.subscribe()
    }

    /// Run the session to completion.
    ///
    /// Cancelling `cancel` requests a graceful stop; the session still tears
    /// down and returns a report with [`SessionEnd::Cancelled`].
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionReport, SessionError> {
        let mut synced = None;
        let outcome = self.drive(&cancel, &mut synced).await;

        let (sync, sync_task_stopped) = match synced {
            Some(Synced { clock, task }) => {
                let stopped = task.shutdown().await;
                (clock.stats(), stopped)
            }
            None => (SyncStats::default(), true),
        };
        self.engine.shutdown().await;

        match outcome {
            Ok(end) => {
                self.transition(PlaybackState::Stopped)?;
                info!(?end, "session finished");
                Ok(SessionReport {
                    end,
                    history: self.history,
                    sync,
                    sync_task_stopped,
                })
            }
            Err(e) => {
                error!("session failed: {}", e);
                if let Err(transition) = self.transition(PlaybackState::Errored) {
                    warn!("{}", transition);
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &mut self,
        cancel: &CancellationToken,
        synced: &mut Option<Synced>,
    ) -> Result<SessionEnd, SessionError> {
        let fetcher = ContextFetcher::new(self.config.fetch.clone());
        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            result = fetcher.fetch(&self.controller) => result?,
        };
        info!(
            base_time = context.base_time,
            current_time = context.current_time,
            clock = %format!("{}:{}", context.clock_host, context.clock_port),
            "session context received"
        );

        self.transition(PlaybackState::Starting)?;

        let clock = NetworkClock::new(
            context.clock_host.clone(),
            context.clock_port,
            context.current_time,
        );
        let task = clock.start_sync(self.config.sync.clone(), cancel);
        *synced = Some(Synced {
            clock: clock.clone(),
            task,
        });

        let mut events = self.engine.take_events().ok_or(EngineError::Closed)?;
        self.configure_engine(&context, &clock)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.stopping(SessionEnd::Cancelled),
            result = self.engine.preroll() => result?,
        }

        // Fresh reading after preroll so preroll time is not lost
        let aligner = PlaybackAligner::new(context.base_time, self.config.seek_threshold);
        let plan = aligner.plan(&clock, self.engine.duration())?;
        if let Some(wait) = plan.wait() {
            info!("playback begins in {:?}", wait);
        }
        if let Some(position) = plan.seek_to {
            info!(offset_ns = plan.offset_ns, "joining mid-stream, seeking");
            if let Err(e) = self.engine.seek(position).await {
                warn!("seek failed, catching up instead: {}", e);
            }
        }

        self.engine.play()?;

        let period = self.config.diagnostic_interval;
        let mut diagnostics = interval_at(Instant::now() + period, period);
        diagnostics.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("stop requested");
                    return self.stopping(SessionEnd::Cancelled);
                }
                event = events.recv() => match event {
                    Some(EngineEvent::StateChanged(EngineState::Playing)) => {
                        if self.state == PlaybackState::Starting {
                            self.transition(PlaybackState::Playing)?;
                        }
                    }
                    Some(EngineEvent::StateChanged(state)) => {
                        debug!(?state, "engine state changed");
                    }
                    Some(EngineEvent::EndOfStream) => {
                        info!("end of stream");
                        return self.stopping(SessionEnd::EndOfStream);
                    }
                    Some(EngineEvent::Error(e)) => return Err(e.into()),
                    None => return Err(EngineError::Closed.into()),
                },
                _ = diagnostics.tick(), if self.state == PlaybackState::Playing => {
                    log_diagnostic(&clock, context.base_time);
                }
            }
        }
    }

    fn configure_engine(
        &mut self,
        context: &SessionContext,
        clock: &NetworkClock,
    ) -> Result<(), SessionError> {
        let locator = context.media_locator();
        debug!(%locator, "configuring media engine");

        self.engine.set_source(&locator)?;
        self.engine.use_clock(clock.clone());
        self.engine.set_timeline_origin(context.base_time);
        if let Some(level) = context.volume_level {
            self.engine.set_volume(level);
        }
        Ok(())
    }

    fn stopping(&mut self, end: SessionEnd) -> Result<SessionEnd, SessionError> {
        self.transition(PlaybackState::Stopping)?;
        Ok(end)
    }

    fn transition(&mut self, next: PlaybackState) -> Result<(), SessionError> {
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(SessionError::InvalidTransition { from, to: next });
        }

        info!(%from, to = %next, "playback state");
        self.state = next;
        self.history.push(next);
        self.state_tx.send_replace(next);
        Ok(())
    }
}

fn log_diagnostic(clock: &NetworkClock, base_time: u64) {
    let now = clock.now();
    let stats = clock.stats();
    info!(
        now,
        position_ns = compute_start_offset(base_time, clock),
        rtt_ns = ?stats.last_round_trip,
        consecutive_failures = stats.consecutive_failures,
        degraded = stats.degraded,
        "clock diagnostic"
    );
}
