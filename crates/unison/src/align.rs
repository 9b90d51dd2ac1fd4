//! Start alignment against the shared timeline
//!
//! Every client renders `media_position = clock.now() - base_time`. The
//! aligner turns a clock reading into where the engine should start: hold
//! before `base_time`, start in place just after it, or seek forward when a
//! client joins a session already well underway.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::clock::ClockSource;

/// Signed distance from `base_time` to `clock.now()`.
///
/// Negative means playback has not logically started yet.
pub fn compute_start_offset(base_time: u64, clock: &dyn ClockSource) -> i64 {
    offset_at(base_time, clock.now())
}

fn offset_at(base_time: u64, now: u64) -> i64 {
    let diff = i128::from(now) - i128::from(base_time);
    diff.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

/// The session started longer ago than the media lasts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("session expired: start offset {offset_ns}ns is past media duration {duration_ns}ns")]
pub struct SessionExpired {
    pub offset_ns: u64,
    pub duration_ns: u64,
}

/// Where and how the engine should begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPlan {
    pub offset_ns: i64,
    /// Position to seek to before playing, if the offset is too large to
    /// catch up on.
    pub seek_to: Option<u64>,
}

impl StartPlan {
    /// Time left until `base_time`, when playback is still pending.
    pub fn wait(&self) -> Option<Duration> {
        (self.offset_ns < 0).then(|| Duration::from_nanos(self.offset_ns.unsigned_abs()))
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackAligner {
    base_time: u64,
    seek_threshold: u64,
}

impl PlaybackAligner {
    pub fn new(base_time: u64, seek_threshold: Duration) -> Self {
        Self {
            base_time,
            seek_threshold: u64::try_from(seek_threshold.as_nanos()).unwrap_or(u64::MAX),
        }
    }

    pub fn base_time(&self) -> u64 {
        self.base_time
    }

    pub fn compute_start_offset(&self, clock: &dyn ClockSource) -> i64 {
        compute_start_offset(self.base_time, clock)
    }

    /// Plan the start from a fresh clock reading.
    ///
    /// `duration` comes from the engine after preroll; unknown durations
    /// never expire.
    pub fn plan(
        &self,
        clock: &dyn ClockSource,
        duration: Option<u64>,
    ) -> Result<StartPlan, SessionExpired> {
        let offset_ns = self.compute_start_offset(clock);

        if offset_ns <= 0 {
            return Ok(StartPlan {
                offset_ns,
                seek_to: None,
            });
        }

        let position = offset_ns.unsigned_abs();
        if let Some(duration_ns) = duration {
            if position > duration_ns {
                return Err(SessionExpired {
                    offset_ns: position,
                    duration_ns,
                });
            }
        }

        let seek_to = (position > self.seek_threshold).then_some(position);
        debug!(offset_ns, ?seek_to, "start plan");

        Ok(StartPlan { offset_ns, seek_to })
    }
}
