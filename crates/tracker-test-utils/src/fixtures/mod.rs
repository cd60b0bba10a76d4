//! Test fixtures for tracker runtime and recorder testing.
//!
//! Provides:
//! - `TrackerProbe` / `ProbeTracker` - counting tracker with configurable factories
//! - `CollectingJobQueue` - job queue that keeps every job
//! - `MockMediaEngine` - media engine that records what it was asked to do
//! - id helpers

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{Role, RoomId};
use signal_protocol::{SessionDescription, Trickle};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracker_service::errors::JobError;
use tracker_service::jobs::{JobQueue, RecordingJob};
use tracker_service::recording::{MediaEngine, MediaSession};
use tracker_service::runtime::Tracker;

/// Room id fixture.
#[must_use]
pub fn room(id: &str) -> RoomId {
    RoomId::parse(id).unwrap()
}

/// The `record` role.
#[must_use]
pub fn record_role() -> Role {
    Role::record()
}

/// `now + seconds`.
#[must_use]
pub fn expires_in(seconds: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(seconds)
}

/// Boxed factory future, so every probe factory has one nameable type.
pub type ProbeFuture = Pin<Box<dyn Future<Output = anyhow::Result<ProbeTracker>> + Send>>;

/// Counts factory calls and closes across every tracker it creates.
#[derive(Debug, Default)]
pub struct TrackerProbe {
    creates: AtomicUsize,
    closes: AtomicUsize,
    /// Factory calls still allowed to fail.
    failures_left: AtomicUsize,
    lifetimes: Mutex<Vec<CancellationToken>>,
}

impl TrackerProbe {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The first `count` factory calls fail.
    #[must_use]
    pub fn failing_first(count: usize) -> Arc<Self> {
        let probe = Self::default();
        probe.failures_left.store(count, Ordering::SeqCst);
        Arc::new(probe)
    }

    #[must_use]
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Lifetime tokens handed to the factory, in call order.
    #[must_use]
    pub fn lifetimes(&self) -> Vec<CancellationToken> {
        self.lifetimes.lock().unwrap().clone()
    }

    /// Factory that succeeds immediately (after any configured failures).
    pub fn factory(
        self: &Arc<Self>,
    ) -> impl FnOnce(CancellationToken, RoomId) -> ProbeFuture + Send + 'static {
        self.slow_factory(Duration::ZERO)
    }

    /// Factory that sleeps for `delay` before deciding.
    pub fn slow_factory(
        self: &Arc<Self>,
        delay: Duration,
    ) -> impl FnOnce(CancellationToken, RoomId) -> ProbeFuture + Send + 'static {
        let probe = Arc::clone(self);
        move |lifetime, _room_id| {
            Box::pin(async move {
                probe.creates.fetch_add(1, Ordering::SeqCst);
                probe.lifetimes.lock().unwrap().push(lifetime);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                let failed = probe
                    .failures_left
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if failed {
                    anyhow::bail!("probe factory failure");
                }
                Ok(ProbeTracker { probe })
            })
        }
    }
}

/// Tracker handed out by [`TrackerProbe`] factories.
#[derive(Debug)]
pub struct ProbeTracker {
    probe: Arc<TrackerProbe>,
}

#[async_trait]
impl Tracker for ProbeTracker {
    async fn close(&mut self) -> anyhow::Result<()> {
        self.probe.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Job queue that keeps every job it is given.
#[derive(Debug, Default)]
pub struct CollectingJobQueue {
    jobs: Mutex<Vec<RecordingJob>>,
}

impl CollectingJobQueue {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[must_use]
    pub fn jobs(&self) -> Vec<RecordingJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Wait until at least `count` jobs have been put.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within `timeout`.
    pub async fn wait_for_jobs(&self, count: usize, timeout: Duration) -> Vec<RecordingJob> {
        let result = tokio::time::timeout(timeout, async {
            loop {
                let jobs = self.jobs();
                if jobs.len() >= count {
                    return jobs;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        result.unwrap_or_else(|_| panic!("expected {count} jobs within {timeout:?}"))
    }
}

#[async_trait]
impl JobQueue for CollectingJobQueue {
    async fn put(&self, job: RecordingJob) -> Result<(), JobError> {
        self.jobs.lock().unwrap().push(job);
        Ok(())
    }
}

/// What a [`MockMediaEngine`] session has been asked to do.
#[derive(Debug, Default)]
pub struct MediaLog {
    pub opened: Vec<RoomId>,
    pub applied_answers: Vec<SessionDescription>,
    pub answered_offers: Vec<SessionDescription>,
    pub candidates: Vec<Trickle>,
    pub closed: usize,
}

/// Media engine that answers every offer with a fixed SDP.
#[derive(Debug, Default)]
pub struct MockMediaEngine {
    log: Arc<Mutex<MediaLog>>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot-free access to the log.
    pub fn with_log<R>(&self, f: impl FnOnce(&MediaLog) -> R) -> R {
        f(&self.log.lock().unwrap())
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn open(&self, room_id: &RoomId) -> anyhow::Result<Box<dyn MediaSession>> {
        self.log.lock().unwrap().opened.push(room_id.clone());
        Ok(Box::new(MockMediaSession {
            log: Arc::clone(&self.log),
        }))
    }
}

struct MockMediaSession {
    log: Arc<Mutex<MediaLog>>,
}

#[async_trait]
impl MediaSession for MockMediaSession {
    async fn create_offer(&mut self) -> anyhow::Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0 recorder-offer"))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> anyhow::Result<()> {
        self.log.lock().unwrap().applied_answers.push(answer);
        Ok(())
    }

    async fn answer_offer(
        &mut self,
        offer: SessionDescription,
    ) -> anyhow::Result<SessionDescription> {
        self.log.lock().unwrap().answered_offers.push(offer);
        Ok(SessionDescription::answer("v=0 recorder-answer"))
    }

    async fn add_ice_candidate(&mut self, trickle: Trickle) -> anyhow::Result<()> {
        self.log.lock().unwrap().candidates.push(trickle);
        Ok(())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        self.log.lock().unwrap().closed += 1;
        Ok(())
    }
}
