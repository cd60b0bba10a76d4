//! Per-key tracker state.
//!
//! Each entry carries two kinds of state:
//!
//! - `status`, `evicted` and `expire_at` are readable without the entry
//!   lock so a GC sweep can scan every entry while only holding the
//!   registry lock. `status` is written only while the entry lock is held
//!   (enforced by [`TrackerEntry::set_status`] taking the locked state);
//!   `expire_at` and `evicted` are written only under the registry lock.
//! - [`EntryState`] sits behind the entry lock and is held across the slow
//!   factory and close calls, which serializes them per key.

use super::Tracker;
use crate::observability::metrics;

use chrono::{DateTime, Utc};
use common::types::TrackerKey;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info, warn};

/// Lifecycle status of a tracker entry.
///
/// `Init → Live → Closing → Closed`, or `Init → Error`. `Error` and
/// `Closed` entries are re-armed by the next start on the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackerStatus {
    /// Created, factory not yet completed.
    Init = 0,
    /// Factory succeeded; tracker running.
    Live = 1,
    /// Close in progress.
    Closing = 2,
    /// Tracker closed and lifetime token canceled.
    Closed = 3,
    /// Factory failed.
    Error = 4,
}

impl TrackerStatus {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => TrackerStatus::Init,
            1 => TrackerStatus::Live,
            2 => TrackerStatus::Closing,
            3 => TrackerStatus::Closed,
            _ => TrackerStatus::Error,
        }
    }

    /// Status name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackerStatus::Init => "init",
            TrackerStatus::Live => "live",
            TrackerStatus::Closing => "closing",
            TrackerStatus::Closed => "closed",
            TrackerStatus::Error => "error",
        }
    }
}

/// Why an entry is being closed (metric label).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseReason {
    Gc,
    Stop,
    Shutdown,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            CloseReason::Gc => "gc",
            CloseReason::Stop => "stop",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// State guarded by the entry lock.
pub(crate) struct EntryState<T> {
    /// Tracker handle, present while `Live`.
    pub(crate) tracker: Option<T>,
    /// When the entry last became `Live`.
    pub(crate) started_at: Option<DateTime<Utc>>,
    /// Token handed to the factory; canceled once the tracker is closed.
    pub(crate) lifetime: CancellationToken,
    /// Outstanding-work unit held by a live tracker until it is closed.
    pub(crate) drain_token: Option<TaskTrackerToken>,
}

/// One registered `(room, role)` tracker.
pub(crate) struct TrackerEntry<T> {
    key: TrackerKey,
    status: AtomicU8,
    evicted: AtomicBool,
    expire_at: StdMutex<DateTime<Utc>>,
    state: Mutex<EntryState<T>>,
}

impl<T: Tracker> TrackerEntry<T> {
    pub(crate) fn new(key: TrackerKey, expire_at: DateTime<Utc>, lifetime: CancellationToken) -> Self {
        Self {
            key,
            status: AtomicU8::new(TrackerStatus::Init as u8),
            evicted: AtomicBool::new(false),
            expire_at: StdMutex::new(expire_at),
            state: Mutex::new(EntryState {
                tracker: None,
                started_at: None,
                lifetime,
                drain_token: None,
            }),
        }
    }

    /// Acquire the entry lock.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, EntryState<T>> {
        self.state.lock().await
    }

    /// Lock-free status read. May be stale; callers that act on it must
    /// re-check under the entry lock.
    pub(crate) fn status(&self) -> TrackerStatus {
        TrackerStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Write the status. The locked state is taken as proof that the
    /// caller holds the entry lock.
    pub(crate) fn set_status(&self, _held: &EntryState<T>, status: TrackerStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    pub(crate) fn expire_at(&self) -> DateTime<Utc> {
        *self.expire_at.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Renew the lease. Called with the registry lock held.
    pub(crate) fn set_expire_at(&self, expire_at: DateTime<Utc>) {
        *self.expire_at.lock().unwrap_or_else(PoisonError::into_inner) = expire_at;
    }

    /// Mark the entry as removed from the registry. Called with the
    /// registry lock held.
    pub(crate) fn mark_evicted(&self) {
        self.evicted.store(true, Ordering::Release);
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// `Error` entries are always collectable; others once their lease is
    /// no longer in the future.
    pub(crate) fn is_gc_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status() == TrackerStatus::Error || self.expire_at() <= now
    }

    /// Close the tracker if it is live.
    ///
    /// Returns `true` if this call performed the close. Close failures are
    /// logged and counted; the lifetime token is canceled and the
    /// outstanding-work unit released regardless.
    pub(crate) async fn close(&self, reason: CloseReason) -> bool {
        let mut state = self.lock().await;

        let status = self.status();
        if status != TrackerStatus::Live {
            debug!(
                target: "ts.runtime",
                key = %self.key,
                status = status.as_str(),
                "Skipping close, tracker is not live"
            );
            return false;
        }

        self.set_status(&state, TrackerStatus::Closing);

        if let Some(mut tracker) = state.tracker.take() {
            if let Err(e) = tracker.close().await {
                warn!(
                    target: "ts.runtime",
                    key = %self.key,
                    error = format!("{e:#}"),
                    "Tracker close failed"
                );
                metrics::record_tracker_close_error();
            }
        }

        state.lifetime.cancel();
        self.set_status(&state, TrackerStatus::Closed);
        state.drain_token = None;

        metrics::record_tracker_closed(reason.as_str());
        info!(
            target: "ts.runtime",
            key = %self.key,
            reason = reason.as_str(),
            "Tracker closed"
        );

        true
    }
}
