//! Tracker runtime lifecycle tests.
//!
//! Covers the runtime's concurrency guarantees end to end:
//! - Single-flight creation under concurrent starts
//! - Lease renewal and expiry-driven GC
//! - Fast retry after a factory failure
//! - Starts that lose their entry to GC while waiting
//! - Shutdown drain
//!
//! Lease deadlines are wall-clock times, so GC tests use short real
//! durations rather than paused time, unless the lease is already past.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracker_service::errors::RuntimeError;
use tracker_service::runtime::{TrackerRuntime, TrackerStatus};
use tracker_test_utils::{expires_in, record_role, room, ProbeTracker, TrackerProbe};

const GC_PERIOD: Duration = Duration::from_millis(50);

fn runtime() -> (Arc<TrackerRuntime<ProbeTracker>>, CancellationToken) {
    let root = CancellationToken::new();
    (Arc::new(TrackerRuntime::new(root.clone())), root)
}

fn spawn_gc(runtime: &Arc<TrackerRuntime<ProbeTracker>>) -> tokio::task::JoinHandle<()> {
    let runtime = Arc::clone(runtime);
    tokio::spawn(async move { runtime.run(GC_PERIOD).await })
}

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ============================================================================
// Single-flight and renewal
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_invoke_factory_once() {
    let (runtime, _root) = runtime();
    let probe = TrackerProbe::new();
    let expire_at = expires_in(60);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let runtime = Arc::clone(&runtime);
            let factory = probe.slow_factory(Duration::from_millis(100));
            tokio::spawn(async move {
                runtime
                    .start_tracker(&room("room-1"), &record_role(), expire_at, factory)
                    .await
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(probe.creates(), 1);
    assert_eq!(results.iter().filter(|r| !r.already_exists).count(), 1);

    let started_at = results.first().unwrap().started_at;
    assert!(started_at.is_some());
    assert!(results.iter().all(|r| r.started_at == started_at));
}

#[tokio::test]
async fn test_renewal_then_expiry_closes_once() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::new();
    let gc = spawn_gc(&runtime);

    let t0 = Utc::now();
    let first = runtime
        .start_tracker(
            &room("room-r"),
            &record_role(),
            t0 + chrono::Duration::milliseconds(300),
            probe.factory(),
        )
        .await
        .unwrap();
    assert!(!first.already_exists);

    let renewed_until = t0 + chrono::Duration::milliseconds(600);
    let second = runtime
        .start_tracker(&room("room-r"), &record_role(), renewed_until, probe.factory())
        .await
        .unwrap();
    assert!(second.already_exists);
    assert_eq!(second.started_at, first.started_at);
    assert_eq!(second.expires_at, renewed_until);

    // Past the original lease, inside the renewed one
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(probe.closes(), 0, "renewed tracker must survive its first lease");

    wait_until(Duration::from_secs(3), || probe.closes() == 1).await;
    assert_eq!(runtime.tracker_count().await, 0);
    assert_eq!(probe.creates(), 1);
    assert!(probe.lifetimes().first().unwrap().is_cancelled());

    // More sweeps never close it again
    tokio::time::sleep(GC_PERIOD * 4).await;
    assert_eq!(probe.closes(), 1);

    root.cancel();
    gc.await.unwrap();
}

#[tokio::test]
async fn test_expired_key_starts_fresh_entry() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::new();
    let gc = spawn_gc(&runtime);

    runtime
        .start_tracker(
            &room("room-1"),
            &record_role(),
            Utc::now() + chrono::Duration::milliseconds(50),
            probe.factory(),
        )
        .await
        .unwrap();
    wait_until(Duration::from_secs(3), || probe.closes() == 1).await;

    let restarted = runtime
        .start_tracker(&room("room-1"), &record_role(), expires_in(60), probe.factory())
        .await
        .unwrap();
    assert!(!restarted.already_exists);
    assert_eq!(probe.creates(), 2);

    let lifetimes = probe.lifetimes();
    assert!(lifetimes.first().unwrap().is_cancelled());
    assert!(!lifetimes.get(1).unwrap().is_cancelled());

    root.cancel();
    gc.await.unwrap();
}

// ============================================================================
// Error retry
// ============================================================================

#[tokio::test]
async fn test_factory_failure_retries_in_place() {
    let (runtime, _root) = runtime();
    let probe = TrackerProbe::failing_first(1);

    let failed = runtime
        .start_tracker(&room("room-1"), &record_role(), expires_in(60), probe.factory())
        .await;
    assert!(matches!(failed, Err(RuntimeError::Factory(_))));

    let retried = runtime
        .start_tracker(&room("room-1"), &record_role(), expires_in(60), probe.factory())
        .await
        .unwrap();
    assert!(!retried.already_exists);
    assert_eq!(probe.creates(), 2);

    // The failed attempt's lifetime is canceled; the retry gets its own
    let lifetimes = probe.lifetimes();
    assert!(lifetimes.first().unwrap().is_cancelled());
    assert!(!lifetimes.get(1).unwrap().is_cancelled());
    assert_eq!(
        runtime.tracker_status(&room("room-1"), &record_role()).await,
        Some(TrackerStatus::Live)
    );
}

#[tokio::test]
async fn test_failed_entry_collected_despite_long_lease() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::failing_first(1);
    let gc = spawn_gc(&runtime);

    let failed = runtime
        .start_tracker(&room("room-1"), &record_role(), expires_in(3600), probe.factory())
        .await;
    assert!(failed.is_err());

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while runtime.tracker_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "failed entry not collected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(probe.closes(), 0, "nothing live to close");

    let retried = runtime
        .start_tracker(&room("room-1"), &record_role(), expires_in(60), probe.factory())
        .await
        .unwrap();
    assert!(!retried.already_exists);

    root.cancel();
    gc.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_start_waiting_on_evicted_entry_registers_fresh_entry() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::failing_first(1);
    let expired = Utc::now() - chrono::Duration::seconds(1);

    // A holds the entry lock inside a slow, failing factory
    let first = {
        let runtime = Arc::clone(&runtime);
        let factory = probe.slow_factory(Duration::from_millis(200));
        tokio::spawn(async move {
            runtime
                .start_tracker(&room("room-1"), &record_role(), expired, factory)
                .await
        })
    };
    while probe.creates() == 0 {
        tokio::task::yield_now().await;
    }

    // B queues on the same entry before GC gets to it
    let second = {
        let runtime = Arc::clone(&runtime);
        let factory = probe.factory();
        tokio::spawn(async move {
            runtime
                .start_tracker(&room("room-1"), &record_role(), expired, factory)
                .await
        })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }

    // GC evicts the entry while both starts are parked on it
    let gc = spawn_gc(&runtime);

    assert!(matches!(first.await.unwrap(), Err(RuntimeError::Factory(_))));
    let retried = second.await.unwrap().unwrap();
    assert!(!retried.already_exists);
    assert_eq!(probe.creates(), 2);

    // The retry landed in a registered entry, not the evicted one
    assert_eq!(runtime.tracker_count().await, 1);
    assert_eq!(
        runtime.tracker_status(&room("room-1"), &record_role()).await,
        Some(TrackerStatus::Live)
    );
    assert_eq!(probe.closes(), 0);

    // So GC can still find it and close it
    tokio::time::sleep(GC_PERIOD * 3).await;
    assert_eq!(probe.closes(), 1);
    assert_eq!(runtime.tracker_count().await, 0);

    root.cancel();
    gc.await.unwrap();
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_then_expiry_does_not_close_twice() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::new();
    let gc = spawn_gc(&runtime);

    let started = runtime
        .start_tracker(
            &room("room-1"),
            &record_role(),
            Utc::now() + chrono::Duration::milliseconds(200),
            probe.factory(),
        )
        .await
        .unwrap();

    let stopped = runtime
        .stop_tracker(&room("room-1"), &record_role())
        .await
        .unwrap();
    assert!(stopped.already_exists);
    assert_eq!(stopped.started_at, started.started_at);
    assert_eq!(probe.closes(), 1);

    // A second stop is a no-op on the closed entry
    runtime
        .stop_tracker(&room("room-1"), &record_role())
        .await
        .unwrap();
    assert_eq!(probe.closes(), 1);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while runtime.tracker_count().await > 0 {
        assert!(tokio::time::Instant::now() < deadline, "stopped entry not collected");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(probe.closes(), 1);

    root.cancel();
    gc.await.unwrap();
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_everything_then_rejects() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::new();
    let gc = spawn_gc(&runtime);

    for id in ["room-1", "room-2", "room-3"] {
        runtime
            .start_tracker(&room(id), &record_role(), expires_in(3600), probe.factory())
            .await
            .unwrap();
    }

    root.cancel();
    gc.await.unwrap();

    assert_eq!(probe.closes(), 3);
    assert!(probe.lifetimes().iter().all(CancellationToken::is_cancelled));
    assert!(runtime.is_shutting_down());

    assert!(matches!(
        runtime
            .start_tracker(&room("room-4"), &record_role(), expires_in(60), probe.factory())
            .await,
        Err(RuntimeError::Closed)
    ));
    assert!(matches!(
        runtime.stop_tracker(&room("room-1"), &record_role()).await,
        Err(RuntimeError::Closed)
    ));
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_start() {
    let (runtime, root) = runtime();
    let probe = TrackerProbe::new();
    let gc = spawn_gc(&runtime);

    let start = {
        let runtime = Arc::clone(&runtime);
        let factory = probe.slow_factory(Duration::from_millis(200));
        tokio::spawn(async move {
            runtime
                .start_tracker(&room("room-1"), &record_role(), expires_in(60), factory)
                .await
        })
    };

    // Let the factory begin before shutting down
    wait_until(Duration::from_secs(1), || probe.creates() == 1).await;
    root.cancel();
    gc.await.unwrap();

    // The close ran after the start finished, never alongside it
    assert!(start.is_finished());
    assert!(start.await.unwrap().is_ok());
    assert_eq!(probe.closes(), 1);
}
