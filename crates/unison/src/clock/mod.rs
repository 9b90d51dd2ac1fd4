//! Network clock
//!
//! Tracks a remote reference clock from a seed value plus periodic
//! round-trip probes (see [`sync`]). Reading the clock never touches the
//! network: `now()` extrapolates the latest estimate with the local
//! monotonic clock.
//!
//! **Key invariant:** `now()` never decreases on a given clock, even when a
//! sync moves the estimate backwards. A high-water mark holds the timeline
//! still until the extrapolation catches up.

pub mod local;
pub mod packet;
pub mod sync;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use thiserror::Error;

pub use local::{LocalClock, ManualClock, MonotonicClock};
pub use packet::{NetTimePacket, CLOCK_TIME_NONE, PACKET_SIZE};
pub use sync::{ClockSyncDegraded, ProbeError, SyncConfig, SyncHealth, SyncStats, SyncTask};

/// Samples are never called outliers below this rtt.
const MIN_OUTLIER_RTT: u64 = 1_000_000;

/// Read-only view of a shared timeline in nanoseconds.
pub trait ClockSource: Send + Sync {
    fn now(&self) -> u64;
}

/// The client's belief about the remote clock.
///
/// `estimated_remote_now` was the remote clock's value at local instant
/// `local_receipt_time`. Replaced wholesale on each accepted sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockEstimate {
    pub estimated_remote_now: u64,
    pub local_receipt_time: u64,
    /// Round trip of the probe that produced this estimate; `None` while seeded.
    pub round_trip: Option<u64>,
    /// Local time the producing reply arrived; `None` while seeded.
    pub last_sync_time: Option<u64>,
}

impl ClockEstimate {
    /// Remote time at `local_now`, clamping instead of wrapping.
    pub fn extrapolate(&self, local_now: u64) -> u64 {
        self.estimated_remote_now
            .saturating_add(local_now.saturating_sub(self.local_receipt_time))
    }

    pub fn is_seeded_only(&self) -> bool {
        self.last_sync_time.is_none()
    }
}

/// Timestamps from one completed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSample {
    pub local_send: u64,
    pub remote_time: u64,
    pub local_recv: u64,
}

impl SyncSample {
    pub fn round_trip(&self) -> u64 {
        self.local_recv.saturating_sub(self.local_send)
    }
}

/// Why a probe result was not applied.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SampleRejected {
    #[error("reply arrived before request was sent (send {send}, recv {recv})")]
    Inverted { send: u64, recv: u64 },

    #[error("provider returned no time")]
    InvalidRemote,

    #[error("sample at {recv} is not newer than last sync at {last}")]
    Stale { recv: u64, last: u64 },

    #[error("round trip {rtt}ns exceeds filter limit (average {average}ns)")]
    Outlier { rtt: u64, average: u64 },
}

#[derive(Debug)]
struct ClockState {
    estimate: ClockEstimate,
    rtt_average: Option<u64>,
}

#[derive(Debug)]
struct Inner {
    host: String,
    port: u16,
    local: Arc<dyn LocalClock>,
    state: RwLock<ClockState>,
    high_water: AtomicU64,
    outlier_factor: AtomicU32,
    health: SyncHealth,
}

/// A clock slaved to a remote time provider.
///
/// Cheap to clone; clones share one estimate.
#[derive(Debug, Clone)]
pub struct NetworkClock {
    inner: Arc<Inner>,
}

impl NetworkClock {
    /// Clock for `remote_host:remote_port`, reading `seed_time` right now.
    ///
    /// No I/O happens here; call [`NetworkClock::start_sync`] to begin probing.
    pub fn new(remote_host: impl Into<String>, remote_port: u16, seed_time: u64) -> Self {
        Self::with_local_clock(
            remote_host,
            remote_port,
            seed_time,
            Arc::new(MonotonicClock::new()),
        )
    }

    /// Same as [`NetworkClock::new`] with an explicit local time source.
    pub fn with_local_clock(
        remote_host: impl Into<String>,
        remote_port: u16,
        seed_time: u64,
        local: Arc<dyn LocalClock>,
    ) -> Self {
        let estimate = ClockEstimate {
            estimated_remote_now: seed_time,
            local_receipt_time: local.now(),
            round_trip: None,
            last_sync_time: None,
        };

        Self {
            inner: Arc::new(Inner {
                host: remote_host.into(),
                port: remote_port,
                local,
                state: RwLock::new(ClockState {
                    estimate,
                    rtt_average: None,
                }),
                high_water: AtomicU64::new(seed_time),
                outlier_factor: AtomicU32::new(SyncConfig::default().outlier_factor),
                health: SyncHealth::new(),
            }),
        }
    }

    /// Best current estimate of the shared timeline.
    pub fn now(&self) -> u64 {
        // Estimate first: its anchor is then never ahead of the local reading.
        let estimate = self.estimate();
        let candidate = estimate.extrapolate(self.inner.local.now());
        let previous = self.inner.high_water.fetch_max(candidate, Ordering::AcqRel);
        previous.max(candidate)
    }

    /// Snapshot of the current estimate.
    pub fn estimate(&self) -> ClockEstimate {
        self.read_state().estimate
    }

    pub fn remote(&self) -> (&str, u16) {
        (&self.inner.host, self.inner.port)
    }

    pub fn local_clock(&self) -> &Arc<dyn LocalClock> {
        &self.inner.local
    }

    pub fn health(&self) -> &SyncHealth {
        &self.inner.health
    }

    pub fn stats(&self) -> SyncStats {
        self.inner.health.snapshot(self.estimate())
    }

    /// Time since the last accepted sync, by the local clock.
    pub fn since_last_sync(&self) -> Option<Duration> {
        self.estimate()
            .last_sync_time
            .map(|t| Duration::from_nanos(self.inner.local.now().saturating_sub(t)))
    }

    pub fn set_outlier_factor(&self, factor: u32) {
        self.inner.outlier_factor.store(factor.max(1), Ordering::Relaxed);
    }

    /// Fold one probe result into the estimate.
    ///
    /// Rejected samples leave the estimate untouched.
    pub fn apply_sample(&self, sample: SyncSample) -> Result<ClockEstimate, SampleRejected> {
        if sample.local_recv < sample.local_send {
            return Err(SampleRejected::Inverted {
                send: sample.local_send,
                recv: sample.local_recv,
            });
        }
        if sample.remote_time == CLOCK_TIME_NONE {
            return Err(SampleRejected::InvalidRemote);
        }

        let rtt = sample.round_trip();
        let factor = u64::from(self.inner.outlier_factor.load(Ordering::Relaxed));
        let mut state = self.write_state();

        if let Some(last) = state.estimate.last_sync_time {
            if sample.local_recv <= last {
                return Err(SampleRejected::Stale {
                    recv: sample.local_recv,
                    last,
                });
            }
        }

        if let Some(average) = state.rtt_average {
            let limit = average.saturating_mul(factor).max(MIN_OUTLIER_RTT);
            if rtt > limit {
                state.rtt_average = Some(moving_average(average, rtt, 16));
                return Err(SampleRejected::Outlier { rtt, average });
            }
        }

        state.rtt_average = Some(match state.rtt_average {
            Some(average) => moving_average(average, rtt, 8),
            None => rtt,
        });
        state.estimate = ClockEstimate {
            estimated_remote_now: sample.remote_time,
            local_receipt_time: sample.local_send.saturating_add(rtt / 2),
            round_trip: Some(rtt),
            last_sync_time: Some(sample.local_recv),
        };

        Ok(state.estimate)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ClockState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ClockState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ClockSource for NetworkClock {
    fn now(&self) -> u64 {
        NetworkClock::now(self)
    }
}

fn moving_average(average: u64, sample: u64, weight: u64) -> u64 {
    let total = u128::from(average) * u128::from(weight - 1) + u128::from(sample);
    u64::try_from(total / u128::from(weight)).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: u64 = 1_000_000_000;

    fn manual_clock(seed: u64) -> (NetworkClock, Arc<ManualClock>) {
        let local = Arc::new(ManualClock::new(5_000));
        let clock = NetworkClock::with_local_clock("127.0.0.1", 9000, seed, local.clone());
        (clock, local)
    }

    fn sample(local_send: u64, remote_time: u64, local_recv: u64) -> SyncSample {
        SyncSample {
            local_send,
            remote_time,
            local_recv,
        }
    }

    #[test]
    fn seeded_clock_reads_seed_immediately() {
        let (clock, _local) = manual_clock(SEED);
        assert_eq!(clock.now(), SEED);
        assert!(clock.estimate().is_seeded_only());
    }

    #[test]
    fn seeded_clock_extrapolates_with_local_time() {
        let (clock, local) = manual_clock(SEED);
        local.advance(5_000_000);
        assert_eq!(clock.now(), SEED + 5_000_000);
    }

    #[test]
    fn sample_anchors_at_round_trip_midpoint() {
        let (clock, local) = manual_clock(SEED);
        local.set(12_000);

        let estimate = clock.apply_sample(sample(10_000, 2 * SEED, 12_000)).unwrap();
        assert_eq!(estimate.local_receipt_time, 11_000);
        assert_eq!(estimate.round_trip, Some(2_000));
        assert_eq!(estimate.last_sync_time, Some(12_000));

        // 1000ns after the midpoint
        assert_eq!(clock.now(), 2 * SEED + 1_000);
    }

    #[test]
    fn backwards_sync_does_not_regress_now() {
        let (clock, local) = manual_clock(SEED);
        local.advance(1_000_000);
        let before = clock.now();
        assert_eq!(before, SEED + 1_000_000);

        // Provider says we were 400us fast
        clock
            .apply_sample(sample(5_000, SEED + 100_000, 1_005_000))
            .unwrap();

        let mut last = before;
        for _ in 0..10 {
            let t = clock.now();
            assert!(t >= last, "clock went backwards: {t} < {last}");
            last = t;
            local.advance(100_000);
        }
        // Extrapolation has caught up and moves again
        assert!(last > before);
    }

    #[test]
    fn rejected_sample_keeps_extrapolation_continuous() {
        let (clock, local) = manual_clock(SEED);
        local.set(20_000);
        clock.apply_sample(sample(18_000, SEED, 20_000)).unwrap();
        let before = clock.estimate();

        let err = clock.apply_sample(sample(30_000, 0, 20_000)).unwrap_err();
        assert!(matches!(err, SampleRejected::Inverted { .. }));
        assert_eq!(clock.estimate(), before);

        local.advance(3_000);
        assert_eq!(clock.now(), before.extrapolate(local.now()));
    }

    #[test]
    fn stale_samples_are_dropped() {
        let (clock, local) = manual_clock(SEED);
        local.set(50_000);
        clock.apply_sample(sample(40_000, SEED, 50_000)).unwrap();

        let err = clock.apply_sample(sample(30_000, SEED, 45_000)).unwrap_err();
        assert_eq!(
            err,
            SampleRejected::Stale {
                recv: 45_000,
                last: 50_000
            }
        );
    }

    #[test]
    fn none_remote_time_is_rejected() {
        let (clock, _local) = manual_clock(SEED);
        let err = clock
            .apply_sample(sample(1, CLOCK_TIME_NONE, 2))
            .unwrap_err();
        assert_eq!(err, SampleRejected::InvalidRemote);
    }

    #[test]
    fn outliers_are_filtered_once_average_exists() {
        let (clock, _local) = manual_clock(SEED);
        clock.apply_sample(sample(0, SEED, 2_000_000)).unwrap();

        let err = clock
            .apply_sample(sample(10_000_000, SEED + 20_000_000, 20_000_000))
            .unwrap_err();
        assert!(matches!(err, SampleRejected::Outlier { rtt: 10_000_000, .. }));

        // Within 2x average is fine
        clock
            .apply_sample(sample(30_000_000, SEED + 30_000_000, 33_000_000))
            .unwrap();
    }

    #[test]
    fn tiny_round_trips_are_never_outliers() {
        let (clock, _local) = manual_clock(SEED);
        clock.apply_sample(sample(0, SEED, 50_000)).unwrap();
        // 10x the average but still under a millisecond
        clock
            .apply_sample(sample(100_000, SEED + 100_000, 600_000))
            .unwrap();
    }

    #[test]
    fn extrapolation_saturates_instead_of_wrapping() {
        let estimate = ClockEstimate {
            estimated_remote_now: u64::MAX - 10,
            local_receipt_time: 100,
            round_trip: None,
            last_sync_time: None,
        };
        assert_eq!(estimate.extrapolate(1_000), u64::MAX);
        // Local reading behind the anchor is treated as zero elapsed
        assert_eq!(estimate.extrapolate(50), u64::MAX - 10);
    }

    #[test]
    fn clones_share_estimate() {
        let (clock, local) = manual_clock(SEED);
        let other = clock.clone();
        local.set(9_000);
        clock.apply_sample(sample(8_000, 3 * SEED, 9_000)).unwrap();
        assert_eq!(other.estimate().estimated_remote_now, 3 * SEED);
    }

    #[test]
    fn concurrent_readers_see_monotonic_time() {
        let local = Arc::new(MonotonicClock::new());
        let clock = NetworkClock::with_local_clock("127.0.0.1", 9000, SEED, local.clone());

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..10_000 {
                        let t = clock.now();
                        assert!(t >= last);
                        last = t;
                    }
                })
            })
            .collect();

        for i in 0..200u64 {
            let now = local.now();
            // Alternate the provider a little ahead and a little behind
            let remote = if i % 2 == 0 { SEED + now + 50_000 } else { SEED + now - 50_000 };
            let _ = clock.apply_sample(sample(now.saturating_sub(1_000), remote, now));
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
