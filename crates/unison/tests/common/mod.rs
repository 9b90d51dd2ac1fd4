//! Shared fixtures: a UDP time provider, a scripted media engine and a
//! mocked controller.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use unison::clock::{NetTimePacket, NetworkClock, SyncConfig};
use unison::context::FetchConfig;
use unison::engine::{
    event_channel, EngineError, EngineEvent, EngineState, EventReceiver, EventSender, MediaEngine,
};
use unison::session::SessionConfig;

/// Answers net-time requests with `epoch + elapsed` in ns.
pub struct TimeProvider {
    addr: SocketAddr,
    epoch: u64,
    started: Instant,
    replies: Arc<AtomicUsize>,
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl TimeProvider {
    pub async fn start(epoch: u64) -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let started = Instant::now();
        let replies = Arc::new(AtomicUsize::new(0));
        let stop = CancellationToken::new();

        let handle = {
            let replies = replies.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 64];
                loop {
                    let (len, from) = tokio::select! {
                        _ = stop.cancelled() => break,
                        received = socket.recv_from(&mut buf) => match received {
                            Ok(received) => received,
                            Err(_) => continue,
                        },
                    };
                    let Ok(request) = NetTimePacket::decode(&buf[..len]) else {
                        continue;
                    };
                    let now = epoch + started.elapsed().as_nanos() as u64;
                    if socket.send_to(&request.reply(now).encode(), from).await.is_ok() {
                        replies.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        };

        Self {
            addr,
            epoch,
            started,
            replies,
            stop,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The provider's current time.
    pub fn now(&self) -> u64 {
        self.epoch + self.started.elapsed().as_nanos() as u64
    }

    pub fn replies(&self) -> usize {
        self.replies.load(Ordering::Relaxed)
    }

    /// Stop answering. The port stays closed afterwards.
    pub async fn stop(self) {
        self.stop.cancel();
        let _ = self.handle.await;
    }
}

pub fn fast_sync() -> SyncConfig {
    SyncConfig {
        interval: Duration::from_millis(20),
        probe_timeout: Duration::from_millis(50),
        degraded_after: 2,
        outlier_factor: 2,
    }
}

/// Poll `condition` every 10ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn abs_diff(a: u64, b: u64) -> u64 {
    a.max(b) - a.min(b)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SetSource(String),
    UseClock,
    Origin(u64),
    Volume(f64),
    Preroll,
    Seek(u64),
    Play,
    Shutdown,
}

/// Inspect a [`ScriptedEngine`] after the session took ownership of it.
#[derive(Clone)]
pub struct EngineProbe {
    calls: Arc<Mutex<Vec<Call>>>,
    clock: Arc<Mutex<Option<NetworkClock>>>,
    events: EventSender,
}

impl EngineProbe {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clock(&self) -> Option<NetworkClock> {
        self.clock.lock().unwrap().clone()
    }

    pub fn send(&self, event: EngineEvent) {
        self.events.send(event).unwrap();
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Seek(position) => Some(position),
                _ => None,
            })
            .collect()
    }
}

/// Engine double that records calls and replays scripted events on play.
pub struct ScriptedEngine {
    calls: Arc<Mutex<Vec<Call>>>,
    clock: Arc<Mutex<Option<NetworkClock>>>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    duration: Option<u64>,
    preroll_error: Option<EngineError>,
    on_play: Vec<EngineEvent>,
}

impl ScriptedEngine {
    pub fn new() -> (Self, EngineProbe) {
        let (events_tx, events_rx) = event_channel();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let clock = Arc::new(Mutex::new(None));
        let probe = EngineProbe {
            calls: calls.clone(),
            clock: clock.clone(),
            events: events_tx.clone(),
        };
        let engine = Self {
            calls,
            clock,
            events_tx,
            events_rx: Some(events_rx),
            duration: None,
            preroll_error: None,
            on_play: vec![EngineEvent::StateChanged(EngineState::Playing)],
        };
        (engine, probe)
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration.as_nanos() as u64);
        self
    }

    pub fn failing_preroll(mut self, error: EngineError) -> Self {
        self.preroll_error = Some(error);
        self
    }

    /// Events sent when `play` is called, replacing the default
    /// `StateChanged(Playing)`.
    pub fn on_play(mut self, events: Vec<EngineEvent>) -> Self {
        self.on_play = events;
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaEngine for ScriptedEngine {
    fn set_source(&mut self, locator: &str) -> Result<(), EngineError> {
        self.record(Call::SetSource(locator.to_string()));
        Ok(())
    }

    fn use_clock(&mut self, clock: NetworkClock) {
        self.record(Call::UseClock);
        *self.clock.lock().unwrap() = Some(clock);
    }

    fn set_timeline_origin(&mut self, base_time: u64) {
        self.record(Call::Origin(base_time));
    }

    fn set_volume(&mut self, level: f64) {
        self.record(Call::Volume(level));
    }

    async fn preroll(&mut self) -> Result<(), EngineError> {
        self.record(Call::Preroll);
        match self.preroll_error.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn duration(&self) -> Option<u64> {
        self.duration
    }

    async fn seek(&mut self, position: u64) -> Result<(), EngineError> {
        self.record(Call::Seek(position));
        Ok(())
    }

    fn play(&mut self) -> Result<(), EngineError> {
        self.record(Call::Play);
        for event in self.on_play.drain(..) {
            let _ = self.events_tx.send(event);
        }
        Ok(())
    }

    fn take_events(&mut self) -> Option<EventReceiver> {
        self.events_rx.take()
    }

    async fn shutdown(&mut self) {
        self.record(Call::Shutdown);
    }
}

/// A control response for a controller on 127.0.0.1.
pub fn control_body(clock_port: u16, base_time: u64, current_time: u64) -> Value {
    json!({
        "clock-port": clock_port,
        "base-time": base_time,
        "current-time": current_time,
        "resource-protocol": "http",
        "resource-port": 8080,
        "resource-path": "/media/session.ogg",
    })
}

/// Mock controller answering `GET /control` with `body`.
pub async fn controller(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/control"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

/// Session settings for `server`. Small start offsets catch up in place
/// so call sequences stay predictable.
pub fn session_config(server: &MockServer) -> SessionConfig {
    SessionConfig {
        fetch: FetchConfig {
            port: server.address().port(),
            timeout: Duration::from_secs(2),
        },
        sync: fast_sync(),
        seek_threshold: Duration::from_millis(500),
        diagnostic_interval: Duration::from_millis(50),
    }
}
