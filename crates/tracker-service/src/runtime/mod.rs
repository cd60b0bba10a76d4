//! Tracker runtime: one long-lived background tracker per `(room, role)`.
//!
//! The runtime keeps a registry of [`TrackerKey`] to entry and guarantees:
//!
//! - Single-flight creation. Concurrent starts for a key invoke the factory
//!   once; the rest observe the live tracker.
//! - Lease expiry. Every start renews the key's deadline; the GC loop in
//!   [`TrackerRuntime::run`] closes entries whose deadline has passed, and
//!   entries whose factory failed.
//! - Graceful drain. When the root token is canceled, `run` closes every
//!   remaining tracker and returns only once all closes have completed.
//!
//! # Locking
//!
//! The registry lock guards the map structure and is never held across a
//! factory or close call. Each entry has its own lock, held across those
//! slow calls, so a slow recorder for one room never blocks another.
//!
//! # Outstanding work
//!
//! Every start call takes a unit from a [`TaskTracker`]. A call that brings
//! an entry live hands its unit to the entry, which releases it when the
//! tracker is closed; every other call releases it on return. Close tasks
//! are themselves spawned on the same tracker, so shutdown waits for both.

mod entry;

pub use entry::TrackerStatus;

use entry::{CloseReason, TrackerEntry};

use crate::errors::RuntimeError;
use crate::observability::metrics;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{Role, RoomId, TrackerKey};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// A long-lived background task owned by the runtime.
///
/// Work started by the tracker should observe the lifetime token handed to
/// its factory; the runtime cancels it after `close` returns.
#[async_trait]
pub trait Tracker: Send + 'static {
    /// Release the tracker's resources. Errors are logged by the runtime
    /// and never prevent the entry from reaching `Closed`.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Result of a start or stop call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerState {
    /// `true` if the call found a live tracker (start) or always (stop).
    pub already_exists: bool,
    /// When the tracker last became live.
    pub started_at: Option<DateTime<Utc>>,
    /// Current lease deadline.
    pub expires_at: DateTime<Utc>,
}

/// Registry of trackers keyed by `(room, role)`.
pub struct TrackerRuntime<T> {
    entries: Mutex<HashMap<TrackerKey, Arc<TrackerEntry<T>>>>,
    /// Written only with `entries` locked.
    shutting_down: AtomicBool,
    root: CancellationToken,
    outstanding: TaskTracker,
}

impl<T: Tracker> TrackerRuntime<T> {
    /// Create a runtime rooted at `root`.
    ///
    /// Every tracker lifetime token is a child of `root`. Canceling it makes
    /// [`run`](Self::run) drain and return.
    #[must_use]
    pub fn new(root: CancellationToken) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            root,
            outstanding: TaskTracker::new(),
        }
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Number of registered entries, in any status.
    pub async fn tracker_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Lock-free status of the entry for a key, if registered.
    pub async fn tracker_status(&self, room_id: &RoomId, role: &Role) -> Option<TrackerStatus> {
        let key = TrackerKey::new(room_id.clone(), role.clone());
        self.entries.lock().await.get(&key).map(|e| e.status())
    }

    /// Start the tracker for `(room_id, role)`, or renew its lease.
    ///
    /// The lease is set to `expire_at` whether or not the tracker is already
    /// live. If it is live the factory is not called and the result reports
    /// `already_exists`. Otherwise `factory` is called with the entry's
    /// lifetime token; on failure the entry is parked in `Error` for the GC
    /// to collect and the error is returned.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Closed` - shutdown has begun
    /// - `RuntimeError::Factory` - the factory failed
    #[instrument(skip_all, name = "ts.runtime.start", fields(room_id = %room_id, role = %role))]
    pub async fn start_tracker<F, Fut>(
        &self,
        room_id: &RoomId,
        role: &Role,
        expire_at: DateTime<Utc>,
        factory: F,
    ) -> Result<TrackerState, RuntimeError>
    where
        F: FnOnce(CancellationToken, RoomId) -> Fut + Send,
        Fut: Future<Output = anyhow::Result<T>> + Send,
    {
        let key = TrackerKey::new(room_id.clone(), role.clone());

        loop {
            let (entry, unit) = {
                let mut entries = self.entries.lock().await;
                if self.is_shutting_down() {
                    metrics::record_tracker_start("closed");
                    return Err(RuntimeError::Closed);
                }

                let entry = if let Some(existing) = entries.get(&key) {
                    existing.set_expire_at(expire_at);
                    Arc::clone(existing)
                } else {
                    let created = Arc::new(TrackerEntry::new(
                        key.clone(),
                        expire_at,
                        self.root.child_token(),
                    ));
                    entries.insert(key.clone(), Arc::clone(&created));
                    metrics::set_tracker_entries(entries.len());
                    created
                };

                (entry, self.outstanding.token())
            };

            let mut state = entry.lock().await;

            if self.is_shutting_down() {
                metrics::record_tracker_start("closed");
                return Err(RuntimeError::Closed);
            }

            // GC or shutdown removed the entry while we waited for its lock.
            // Look the key up again so we never bring an orphan live.
            if entry.is_evicted() {
                debug!(target: "ts.runtime", key = %key, "Entry evicted while waiting, retrying");
                continue;
            }

            match entry.status() {
                TrackerStatus::Live => {
                    metrics::record_tracker_start("renewed");
                    debug!(target: "ts.runtime", key = %key, "Tracker lease renewed");
                    return Ok(TrackerState {
                        already_exists: true,
                        started_at: state.started_at,
                        expires_at: entry.expire_at(),
                    });
                }
                TrackerStatus::Closed | TrackerStatus::Error => {
                    // The previous lifetime was canceled by its close or failure
                    state.lifetime = self.root.child_token();
                }
                TrackerStatus::Init | TrackerStatus::Closing => {}
            }

            return match factory(state.lifetime.clone(), room_id.clone()).await {
                Ok(tracker) => {
                    let started_at = Utc::now();
                    state.tracker = Some(tracker);
                    state.started_at = Some(started_at);
                    state.drain_token = Some(unit);
                    entry.set_status(&state, TrackerStatus::Live);

                    metrics::record_tracker_start("created");
                    info!(
                        target: "ts.runtime",
                        key = %key,
                        expires_at = %entry.expire_at(),
                        "Tracker started"
                    );

                    Ok(TrackerState {
                        already_exists: false,
                        started_at: Some(started_at),
                        expires_at: entry.expire_at(),
                    })
                }
                Err(e) => {
                    state.lifetime.cancel();
                    entry.set_status(&state, TrackerStatus::Error);

                    metrics::record_tracker_start("error");
                    warn!(
                        target: "ts.runtime",
                        key = %key,
                        error = format!("{e:#}"),
                        "Tracker factory failed"
                    );

                    Err(RuntimeError::Factory(e))
                }
            };
        }
    }

    /// Close the tracker for `(room_id, role)` and report its times.
    ///
    /// The entry stays registered; a later start re-arms it with a fresh
    /// lifetime token. Stopping an entry that is not live is a no-op.
    ///
    /// # Errors
    ///
    /// - `RuntimeError::Closed` - shutdown has begun
    /// - `RuntimeError::NotFound` - no entry for the key
    #[instrument(skip_all, name = "ts.runtime.stop", fields(room_id = %room_id, role = %role))]
    pub async fn stop_tracker(
        &self,
        room_id: &RoomId,
        role: &Role,
    ) -> Result<TrackerState, RuntimeError> {
        let key = TrackerKey::new(room_id.clone(), role.clone());

        let entry = {
            let entries = self.entries.lock().await;
            if self.is_shutting_down() {
                return Err(RuntimeError::Closed);
            }
            entries
                .get(&key)
                .cloned()
                .ok_or_else(|| RuntimeError::NotFound(key.to_string()))?
        };

        let closing = Arc::clone(&entry);
        let handle = self
            .outstanding
            .spawn(async move { closing.close(CloseReason::Stop).await });
        if let Err(e) = handle.await {
            warn!(target: "ts.runtime", key = %key, error = %e, "Tracker close task failed");
        }

        let state = entry.lock().await;
        Ok(TrackerState {
            already_exists: true,
            started_at: state.started_at,
            expires_at: entry.expire_at(),
        })
    }

    /// Run the GC loop until the root token is canceled, then drain.
    ///
    /// Not safe to call concurrently with itself.
    #[instrument(skip_all, name = "ts.runtime.run", fields(gc_period_ms = gc_period.as_millis() as u64))]
    pub async fn run(&self, gc_period: Duration) {
        info!(target: "ts.runtime", "Tracker runtime started");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + gc_period, gc_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.root.cancelled() => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }

        self.drain().await;
    }

    /// Close every expired or failed entry.
    async fn sweep(&self) {
        let started = Instant::now();
        let now = Utc::now();

        let (total, expired) = {
            let mut entries = self.entries.lock().await;
            let total = entries.len();

            let keys: Vec<TrackerKey> = entries
                .iter()
                .filter(|(_, entry)| entry.is_gc_eligible(now))
                .map(|(key, _)| key.clone())
                .collect();

            let expired: Vec<Arc<TrackerEntry<T>>> = keys
                .iter()
                .filter_map(|key| entries.remove(key))
                .inspect(|entry| entry.mark_evicted())
                .collect();

            metrics::set_tracker_entries(entries.len());
            (total, expired)
        };

        let evicted = expired.len();
        if evicted == 0 {
            debug!(target: "ts.runtime", total, "GC sweep found nothing to collect");
            metrics::record_gc_sweep(started.elapsed(), 0);
            return;
        }

        let closed = self.close_entries(expired, CloseReason::Gc).await;

        info!(
            target: "ts.runtime",
            total,
            evicted,
            closed,
            "GC sweep complete"
        );
        metrics::record_gc_sweep(started.elapsed(), evicted);
    }

    /// Refuse new work, close everything, and wait for outstanding work.
    async fn drain(&self) {
        let remaining: Vec<Arc<TrackerEntry<T>>> = {
            let mut entries = self.entries.lock().await;
            self.shutting_down.store(true, Ordering::Release);
            let all = entries
                .drain()
                .map(|(_, entry)| {
                    entry.mark_evicted();
                    entry
                })
                .collect();
            metrics::set_tracker_entries(0);
            all
        };

        info!(
            target: "ts.runtime",
            remaining = remaining.len(),
            "Tracker runtime shutting down, closing remaining trackers"
        );

        let closed = self.close_entries(remaining, CloseReason::Shutdown).await;

        self.outstanding.close();
        self.outstanding.wait().await;

        info!(target: "ts.runtime", closed, "Tracker runtime drained");
    }

    /// Close a batch of entries in parallel, returning how many were live.
    async fn close_entries(&self, entries: Vec<Arc<TrackerEntry<T>>>, reason: CloseReason) -> usize {
        let handles: Vec<_> = entries
            .into_iter()
            .map(|entry| {
                self.outstanding
                    .spawn(async move { entry.close(reason).await })
            })
            .collect();

        let mut closed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(target: "ts.runtime", error = %e, "Tracker close task failed");
                }
            }
        }
        closed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Probe {
        creates: AtomicUsize,
        closes: AtomicUsize,
    }

    struct ProbeTracker {
        probe: Arc<Probe>,
    }

    #[async_trait]
    impl Tracker for ProbeTracker {
        async fn close(&mut self) -> anyhow::Result<()> {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn room() -> RoomId {
        RoomId::parse("room-1").unwrap()
    }

    fn factory(
        probe: &Arc<Probe>,
    ) -> impl FnOnce(CancellationToken, RoomId) -> futures::future::Ready<anyhow::Result<ProbeTracker>>
    {
        let probe = Arc::clone(probe);
        move |_lifetime, _room| {
            probe.creates.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(ProbeTracker { probe }))
        }
    }

    #[tokio::test]
    async fn test_renewal_does_not_recreate() {
        let runtime = TrackerRuntime::new(CancellationToken::new());
        let probe = Arc::new(Probe::default());
        let now = Utc::now();

        let first = runtime
            .start_tracker(&room(), &Role::record(), now + ChronoDuration::seconds(60), factory(&probe))
            .await
            .unwrap();
        assert!(!first.already_exists);

        let second = runtime
            .start_tracker(&room(), &Role::record(), now + ChronoDuration::seconds(120), factory(&probe))
            .await
            .unwrap();
        assert!(second.already_exists);
        assert_eq!(second.started_at, first.started_at);
        assert_eq!(second.expires_at, now + ChronoDuration::seconds(120));
        assert_eq!(probe.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_roles_are_independent() {
        let runtime = TrackerRuntime::new(CancellationToken::new());
        let probe = Arc::new(Probe::default());
        let expire_at = Utc::now() + ChronoDuration::seconds(60);

        runtime
            .start_tracker(&room(), &Role::record(), expire_at, factory(&probe))
            .await
            .unwrap();
        let other = runtime
            .start_tracker(&room(), &Role::parse("transcribe").unwrap(), expire_at, factory(&probe))
            .await
            .unwrap();

        assert!(!other.already_exists);
        assert_eq!(probe.creates.load(Ordering::SeqCst), 2);
        assert_eq!(runtime.tracker_count().await, 2);
    }

    #[tokio::test]
    async fn test_stop_unknown_key_is_not_found() {
        let runtime: TrackerRuntime<ProbeTracker> = TrackerRuntime::new(CancellationToken::new());
        let result = runtime.stop_tracker(&room(), &Role::record()).await;
        assert!(matches!(result, Err(RuntimeError::NotFound(key)) if key == "room-1/record"));
    }

    #[tokio::test]
    async fn test_stop_keeps_entry_and_restart_gets_fresh_lifetime() {
        let runtime = TrackerRuntime::new(CancellationToken::new());
        let probe = Arc::new(Probe::default());
        let expire_at = Utc::now() + ChronoDuration::seconds(60);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let capture = |tx: tokio::sync::mpsc::UnboundedSender<CancellationToken>| {
            let probe = Arc::clone(&probe);
            move |lifetime: CancellationToken, _room: RoomId| {
                tx.send(lifetime).unwrap();
                futures::future::ready(Ok(ProbeTracker { probe }))
            }
        };

        runtime
            .start_tracker(&room(), &Role::record(), expire_at, capture(tx.clone()))
            .await
            .unwrap();
        let first_lifetime = rx.recv().await.unwrap();

        let stopped = runtime.stop_tracker(&room(), &Role::record()).await.unwrap();
        assert!(stopped.already_exists);
        assert!(first_lifetime.is_cancelled());
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);
        assert_eq!(
            runtime.tracker_status(&room(), &Role::record()).await,
            Some(TrackerStatus::Closed)
        );

        let restarted = runtime
            .start_tracker(&room(), &Role::record(), expire_at, capture(tx))
            .await
            .unwrap();
        assert!(!restarted.already_exists);

        let second_lifetime = rx.recv().await.unwrap();
        assert!(!second_lifetime.is_cancelled());
    }

    #[tokio::test]
    async fn test_factory_error_parks_entry() {
        let runtime: TrackerRuntime<ProbeTracker> = TrackerRuntime::new(CancellationToken::new());
        let expire_at = Utc::now() + ChronoDuration::seconds(60);

        let result = runtime
            .start_tracker(&room(), &Role::record(), expire_at, |_, _| async {
                Err(anyhow::anyhow!("sfu unreachable"))
            })
            .await;

        assert!(matches!(result, Err(RuntimeError::Factory(_))));
        assert_eq!(
            runtime.tracker_status(&room(), &Role::record()).await,
            Some(TrackerStatus::Error)
        );
    }

    #[tokio::test]
    async fn test_entries_gauge_counts_registered_entries() {
        use metrics_util::debugging::{DebugValue, DebuggingRecorder};

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _guard = ::metrics::set_default_local_recorder(&recorder);

        let runtime = TrackerRuntime::new(CancellationToken::new());
        let probe = Arc::new(Probe::default());
        let expire_at = Utc::now() + ChronoDuration::seconds(60);

        runtime
            .start_tracker(&room(), &Role::record(), expire_at, factory(&probe))
            .await
            .unwrap();
        let failed = runtime
            .start_tracker(
                &RoomId::parse("room-2").unwrap(),
                &Role::record(),
                expire_at,
                |_, _| async { Err::<ProbeTracker, _>(anyhow::anyhow!("sfu unreachable")) },
            )
            .await;
        assert!(failed.is_err());
        runtime.stop_tracker(&room(), &Role::record()).await.unwrap();

        // Neither entry is live, both are still registered
        let entries = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .find_map(|(key, _, _, value)| match value {
                DebugValue::Gauge(value) if key.key().name() == "ts_tracker_entries" => {
                    Some(value.into_inner())
                }
                _ => None,
            });
        assert_eq!(entries, Some(2.0));
        assert_eq!(runtime.tracker_count().await, 2);
    }

    #[tokio::test]
    async fn test_root_lifetime_cancels_children() {
        let root = CancellationToken::new();
        let runtime = TrackerRuntime::new(root.clone());
        let probe = Arc::new(Probe::default());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let capture_probe = Arc::clone(&probe);
        runtime
            .start_tracker(
                &room(),
                &Role::record(),
                Utc::now() + ChronoDuration::seconds(60),
                move |lifetime, _| {
                    tx.send(lifetime).unwrap();
                    futures::future::ready(Ok(ProbeTracker {
                        probe: capture_probe,
                    }))
                },
            )
            .await
            .unwrap();

        let lifetime = rx.recv().await.unwrap();
        root.cancel();
        assert!(lifetime.is_cancelled());
    }
}
