//! Unison: synchronized media playback client
//!
//! Many clients render the same media in lockstep. Each one fetches the
//! session context from a controller, slaves a [`NetworkClock`] to the
//! controller's time provider, and renders at
//! `media_position = clock.now() - base_time`.
//!
//! - [`context`]: control-plane fetch of the [`SessionContext`]
//! - [`clock`]: network clock estimation and background sync
//! - [`align`]: start offset and seek decisions against `base_time`
//! - [`engine`]: the media engine seam and the headless engine
//! - [`session`]: the playback state machine tying it together

pub mod align;
pub mod clock;
pub mod context;
pub mod engine;
pub mod session;
pub mod telemetry;

pub use align::{compute_start_offset, PlaybackAligner, SessionExpired, StartPlan};
pub use clock::{
    ClockEstimate, ClockSource, ClockSyncDegraded, NetworkClock, SyncConfig, SyncStats, SyncTask,
};
pub use context::{ContextFetcher, FetchConfig, FetchError, SessionContext};
pub use engine::{EngineError, EngineEvent, EngineState, HeadlessEngine, MediaEngine};
pub use session::{
    MediaSession, PlaybackState, SessionConfig, SessionEnd, SessionError, SessionReport,
};
