//! Media engine seam
//!
//! The session drives decode/render through [`MediaEngine`] and hears back
//! through an event channel. Engines send with an unbounded sender so their
//! own threads never block on a slow consumer.

pub mod headless;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::clock::NetworkClock;

pub use headless::{HeadlessConfig, HeadlessEngine};

pub type EventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Null,
    Ready,
    Paused,
    Playing,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid media source: {0}")]
    InvalidSource(String),

    #[error("media resource unreachable: {0}")]
    ResourceUnreachable(String),

    #[error("decode failure: {0}")]
    Decode(String),

    #[error("seek to {position}ns failed: {reason}")]
    Seek { position: u64, reason: String },

    #[error("cannot change state to {target:?}: {reason}")]
    StateChange { target: EngineState, reason: String },

    #[error("engine event channel closed")]
    Closed,
}

/// Asynchronous notifications from the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged(EngineState),
    Error(EngineError),
    EndOfStream,
}

/// A decode/render backend slaved to an external timeline.
///
/// The session calls these in order: `set_source`, `use_clock`,
/// `set_timeline_origin`, optional `set_volume`, `preroll`, optional
/// `seek`, `play`. `shutdown` may be called at any point and more than once.
#[async_trait]
pub trait MediaEngine: Send {
    fn set_source(&mut self, locator: &str) -> Result<(), EngineError>;

    /// Render against `clock` instead of a locally generated clock.
    fn use_clock(&mut self, clock: NetworkClock);

    /// Running time zero is this instant on the clock.
    fn set_timeline_origin(&mut self, base_time: u64);

    fn set_volume(&mut self, _level: f64) {}

    /// Get ready to render the first frame.
    async fn preroll(&mut self) -> Result<(), EngineError>;

    /// Media duration in ns, once known.
    fn duration(&self) -> Option<u64>;

    async fn seek(&mut self, position: u64) -> Result<(), EngineError>;

    /// Request playing. Confirmation arrives as `StateChanged(Playing)`.
    fn play(&mut self) -> Result<(), EngineError>;

    /// The event stream; `None` once taken.
    fn take_events(&mut self) -> Option<EventReceiver>;

    /// Stop rendering and release devices. Ends in `Null`.
    async fn shutdown(&mut self);
}
