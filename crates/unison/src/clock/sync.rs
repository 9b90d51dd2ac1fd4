//! Background clock synchronization
//!
//! A periodic task probes the time provider over UDP and folds each reply
//! into the clock's estimate:
//! - One request/response per interval, bounded by a probe timeout
//! - Failures keep the previous estimate in effect (stale but usable)
//! - After `degraded_after` consecutive failures sync is reported degraded
//! - The socket is dropped and re-resolved after I/O errors
//!
//! Probe failures never reach callers of `now()`; they are logged and
//! counted in [`SyncHealth`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::packet::{NetTimePacket, PacketTooShort};
use super::{ClockEstimate, LocalClock, NetworkClock, SampleRejected, SyncSample};

/// Configuration for the sync task
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How often to probe
    pub interval: Duration,
    /// How long to wait for a reply
    pub probe_timeout: Duration,
    /// Consecutive failures before sync counts as degraded
    pub degraded_after: u32,
    /// Round trips above this multiple of the average are discarded
    pub outlier_factor: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
            degraded_after: 3,
            outlier_factor: 2,
        }
    }
}

impl From<&unisonconf::ClockConfig> for SyncConfig {
    fn from(config: &unisonconf::ClockConfig) -> Self {
        Self {
            interval: config.sync_interval(),
            probe_timeout: config.probe_timeout(),
            degraded_after: config.degraded_after,
            outlier_factor: config.outlier_factor,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to resolve time provider {host}:{port}: {message}")]
    Resolve {
        host: String,
        port: u16,
        message: String,
    },

    #[error("time provider socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no reply from time provider within {0:?}")]
    Timeout(Duration),

    #[error("malformed reply: {0}")]
    Malformed(#[from] PacketTooShort),
}

/// Reported when sync keeps failing. Playback continues on the last estimate.
#[derive(Debug, Error)]
#[error(
    "clock sync degraded: {consecutive_failures} consecutive probe failures \
     (last sync {since_last_sync:?} ago): {last_error}"
)]
pub struct ClockSyncDegraded {
    pub consecutive_failures: u32,
    pub since_last_sync: Option<Duration>,
    pub last_error: String,
}

/// Point-in-time copy of [`SyncHealth`] plus the estimate it describes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub successes: u64,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub rejected_samples: u64,
    pub last_round_trip: Option<u64>,
    pub last_sync_time: Option<u64>,
    pub degraded: bool,
}

/// Sync outcome counters
///
/// Atomic fields allow lock-free reads from diagnostics.
#[derive(Debug)]
pub struct SyncHealth {
    successes: AtomicU64,
    consecutive_failures: AtomicU32,
    total_failures: AtomicU64,
    rejected_samples: AtomicU64,
    degraded: AtomicBool,
}

impl SyncHealth {
    pub fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            rejected_samples: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    /// Record an applied sample. Returns true if this ended a degraded episode.
    pub fn record_success(&self) -> bool {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.degraded.swap(false, Ordering::AcqRel)
    }

    /// Record a failed probe. Returns the consecutive failure count.
    pub fn record_failure(&self) -> u32 {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_rejected(&self) {
        self.rejected_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark degraded. Returns true if it was not already.
    pub fn mark_degraded(&self) -> bool {
        !self.degraded.swap(true, Ordering::AcqRel)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, estimate: ClockEstimate) -> SyncStats {
        SyncStats {
            successes: self.successes.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            rejected_samples: self.rejected_samples.load(Ordering::Relaxed),
            last_round_trip: estimate.round_trip,
            last_sync_time: estimate.last_sync_time,
            degraded: self.is_degraded(),
        }
    }
}

impl Default for SyncHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running sync task
///
/// Dropping the handle cancels the task; [`SyncTask::shutdown`] also waits
/// for it to finish.
#[derive(Debug)]
pub struct SyncTask {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SyncTask {
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait. Returns false if the task panicked.
    pub async fn shutdown(mut self) -> bool {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(()) => true,
                Err(e) => {
                    warn!("clock sync task ended abnormally: {}", e);
                    false
                }
            },
            None => true,
        }
    }
}

impl Drop for SyncTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl NetworkClock {
    /// Spawn the periodic sync task.
    ///
    /// The task stops when `parent` is cancelled or the returned handle is
    /// shut down or dropped. Must be called inside a tokio runtime.
    pub fn start_sync(&self, config: SyncConfig, parent: &CancellationToken) -> SyncTask {
        self.set_outlier_factor(config.outlier_factor);

        let cancel = parent.child_token();
        let token = cancel.clone();
        let clock = self.clone();
        let handle = tokio::spawn(async move { run_sync_loop(clock, config, token).await });

        SyncTask {
            cancel,
            handle: Some(handle),
        }
    }
}

enum SyncFailure {
    Probe(ProbeError),
    Rejected(SampleRejected),
}

async fn run_sync_loop(clock: NetworkClock, config: SyncConfig, cancel: CancellationToken) {
    let (host, port) = clock.remote();
    let (host, port) = (host.to_string(), port);
    debug!("clock sync against {}:{} every {:?}", host, port, config.interval);

    let mut socket: Option<UdpSocket> = None;
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sync_once(&clock, &host, port, &mut socket, config.probe_timeout) => result,
        };

        match result {
            Ok(estimate) => {
                let recovered = clock.health().record_success();
                debug!(
                    rtt_ns = estimate.round_trip.unwrap_or_default(),
                    remote = estimate.estimated_remote_now,
                    "clock sync ok"
                );
                if recovered {
                    info!("clock sync with {}:{} recovered", host, port);
                }
            }
            Err(SyncFailure::Rejected(reason)) => {
                clock.health().record_rejected();
                debug!("clock sample discarded: {}", reason);
            }
            Err(SyncFailure::Probe(e)) => {
                if matches!(e, ProbeError::Io(_)) {
                    socket = None;
                }
                let failures = clock.health().record_failure();
                warn!(
                    "clock probe to {}:{} failed ({}/{}): {}",
                    host, port, failures, config.degraded_after, e
                );

                if failures >= config.degraded_after && clock.health().mark_degraded() {
                    let degraded = ClockSyncDegraded {
                        consecutive_failures: failures,
                        since_last_sync: clock.since_last_sync(),
                        last_error: e.to_string(),
                    };
                    warn!("{}", degraded);
                }
            }
        }
    }

    debug!("clock sync task shutting down");
}

async fn sync_once(
    clock: &NetworkClock,
    host: &str,
    port: u16,
    socket: &mut Option<UdpSocket>,
    timeout: Duration,
) -> Result<ClockEstimate, SyncFailure> {
    let sock = match socket.take() {
        Some(sock) => sock,
        None => tokio::time::timeout(timeout, connect(host, port))
            .await
            .map_err(|_| SyncFailure::Probe(ProbeError::Timeout(timeout)))?
            .map_err(SyncFailure::Probe)?,
    };

    let probed = probe(&sock, clock.local_clock().as_ref(), timeout).await;
    *socket = Some(sock);
    let sample = probed.map_err(SyncFailure::Probe)?;

    clock.apply_sample(sample).map_err(SyncFailure::Rejected)
}

/// Resolve the provider and open a connected UDP socket to it.
pub async fn connect(host: &str, port: u16) -> Result<UdpSocket, ProbeError> {
    let resolve_error = |message: String| ProbeError::Resolve {
        host: host.to_string(),
        port,
        message,
    };

    let remote: SocketAddr = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| resolve_error(e.to_string()))?
        .next()
        .ok_or_else(|| resolve_error("no addresses".to_string()))?;

    let bind: SocketAddr = if remote.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(remote).await?;
    Ok(socket)
}

/// One request/response exchange.
///
/// Replies that echo a different local time belong to an earlier probe
/// and are skipped.
pub async fn probe(
    socket: &UdpSocket,
    local: &dyn LocalClock,
    timeout: Duration,
) -> Result<SyncSample, ProbeError> {
    let local_send = local.now();
    socket.send(&NetTimePacket::request(local_send).encode()).await?;

    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 64];

    loop {
        let len = match tokio::time::timeout_at(deadline, socket.recv(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => return Err(ProbeError::Timeout(timeout)),
        };
        let local_recv = local.now();
        let reply = NetTimePacket::decode(&buf[..len])?;

        if reply.local_time != local_send {
            debug!(
                "skipping late reply for {} (waiting on {})",
                reply.local_time, local_send
            );
            continue;
        }

        return Ok(SyncSample {
            local_send,
            remote_time: reply.remote_time,
            local_recv,
        });
    }
}
