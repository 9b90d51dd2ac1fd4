//! NetworkClock against a live UDP time provider.

mod common;

use std::time::Duration;

use common::{abs_diff, eventually, fast_sync, TimeProvider};
use tokio_util::sync::CancellationToken;
use unison::clock::NetworkClock;

const EPOCH: u64 = 50_000_000_000;
const TOLERANCE: u64 = 50_000_000;

#[tokio::test]
async fn converges_on_provider_time() {
    let provider = TimeProvider::start(EPOCH).await;
    let clock = NetworkClock::new("127.0.0.1", provider.port(), 0);
    let parent = CancellationToken::new();
    let task = clock.start_sync(fast_sync(), &parent);

    assert!(
        eventually(Duration::from_secs(3), || clock.stats().successes >= 3).await,
        "no successful syncs: {:?}",
        clock.stats()
    );

    let diff = abs_diff(clock.now(), provider.now());
    assert!(diff < TOLERANCE, "clock off by {diff}ns");
    assert!(!clock.estimate().is_seeded_only());
    assert!(clock.estimate().round_trip.is_some());

    assert!(task.shutdown().await);
    provider.stop().await;
}

#[tokio::test]
async fn keeps_running_when_provider_goes_away() {
    let provider = TimeProvider::start(EPOCH).await;
    let clock = NetworkClock::new("127.0.0.1", provider.port(), 0);
    let parent = CancellationToken::new();
    let task = clock.start_sync(fast_sync(), &parent);

    assert!(eventually(Duration::from_secs(3), || clock.stats().successes >= 1).await);
    provider.stop().await;

    assert!(
        eventually(Duration::from_secs(3), || clock.health().is_degraded()).await,
        "sync never degraded: {:?}",
        clock.stats()
    );

    // Still extrapolating from the last good estimate
    let before = clock.now();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let after = clock.now();
    assert!(after > before);
    assert!(after > EPOCH);

    let stats = clock.stats();
    assert!(stats.total_failures >= 2, "{stats:?}");
    assert!(stats.degraded);

    assert!(task.shutdown().await);
}

#[tokio::test]
async fn unresolvable_provider_only_degrades() {
    let clock = NetworkClock::new("no-such-host.invalid", 5637, EPOCH);
    let parent = CancellationToken::new();
    let task = clock.start_sync(fast_sync(), &parent);

    assert!(eventually(Duration::from_secs(5), || clock.health().is_degraded()).await);
    assert!(clock.now() >= EPOCH);
    assert!(clock.estimate().is_seeded_only());

    assert!(task.shutdown().await);
}

#[tokio::test]
async fn parent_cancellation_stops_sync() {
    let provider = TimeProvider::start(EPOCH).await;
    let clock = NetworkClock::new("127.0.0.1", provider.port(), 0);
    let parent = CancellationToken::new();
    let task = clock.start_sync(fast_sync(), &parent);

    parent.cancel();
    assert!(eventually(Duration::from_secs(1), || task.is_finished()).await);

    let replies = provider.replies();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.replies(), replies);

    provider.stop().await;
}
