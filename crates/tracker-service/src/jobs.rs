//! Recording job emission.
//!
//! Trackers report completion by putting a [`RecordingJob`] on a
//! [`JobQueue`]. Retry, backoff and burying belong to the queue's consumer;
//! this side only enqueues.

use crate::errors::JobError;
use crate::observability::metrics;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{Role, RoomId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// How a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Stopped by its owner (stop, expiry or shutdown).
    Completed,
    /// The SFU session ended underneath the recorder.
    Failed,
}

impl JobOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Failed => "failed",
        }
    }
}

/// Post-processing job for one recording session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingJob {
    pub job_id: Uuid,
    pub room_id: RoomId,
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: JobOutcome,
}

/// Destination for recording jobs.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job.
    async fn put(&self, job: RecordingJob) -> Result<(), JobError>;
}

/// In-process queue backed by a bounded channel. Never blocks the caller.
#[derive(Debug, Clone)]
pub struct ChannelJobQueue {
    sender: mpsc::Sender<RecordingJob>,
}

impl ChannelJobQueue {
    /// Create the queue and its receiving end.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RecordingJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn put(&self, job: RecordingJob) -> Result<(), JobError> {
        match self.sender.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(target: "ts.jobs", job_id = %job.job_id, "Job queue full, dropping job");
                metrics::record_job_emitted("dropped");
                Err(JobError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(JobError::QueueClosed),
        }
    }
}

/// Drain the queue into the log until it closes or `cancel_token` fires.
///
/// Jobs still buffered when the token fires are flushed before returning.
pub async fn run_job_publisher(
    mut receiver: mpsc::Receiver<RecordingJob>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => publish(&job),
                None => return,
            },
        }
    }

    receiver.close();
    while let Some(job) = receiver.recv().await {
        publish(&job);
    }
}

fn publish(job: &RecordingJob) {
    metrics::record_job_emitted(job.outcome.as_str());
    info!(
        target: "ts.jobs",
        job_id = %job.job_id,
        room_id = %job.room_id,
        role = %job.role,
        started_at = %job.started_at,
        finished_at = %job.finished_at,
        outcome = job.outcome.as_str(),
        "Recording job emitted"
    );
}
