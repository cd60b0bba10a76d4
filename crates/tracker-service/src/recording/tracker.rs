use super::media::{MediaEngine, MediaSession};
use crate::jobs::{JobOutcome, JobQueue, RecordingJob};
use crate::runtime::Tracker;
use crate::signal::{SignalConfig, SignalMultiplexer};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{Role, RoomId};
use signal_protocol::{JoinRequest, SessionDescription, Trickle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Buffer between the signal reader callbacks and the worker.
const SESSION_EVENT_BUFFER: usize = 64;

/// Bound on waiting for the worker to exit on close.
const WORKER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Unsolicited SFU messages forwarded to the worker.
enum SessionEvent {
    Offer(SessionDescription),
    Trickle(Trickle),
}

/// Creates [`RecordingTracker`]s.
#[derive(Clone)]
pub struct RecordingFactory {
    signal: SignalConfig,
    uid: String,
    jobs: Arc<dyn JobQueue>,
    media: Option<Arc<dyn MediaEngine>>,
}

impl RecordingFactory {
    /// `uid` identifies the recorder to the SFU.
    pub fn new(signal: SignalConfig, uid: impl Into<String>, jobs: Arc<dyn JobQueue>) -> Self {
        Self {
            signal,
            uid: uid.into(),
            jobs,
            media: None,
        }
    }

    /// Attach a media engine. Without one the recorder joins receive-only
    /// with no offer and ignores renegotiation offers.
    #[must_use]
    pub fn with_media_engine(mut self, engine: Arc<dyn MediaEngine>) -> Self {
        self.media = Some(engine);
        self
    }

    /// Dial the SFU, join `room_id` and start the recorder worker.
    ///
    /// The join is abandoned if `lifetime` is canceled first.
    #[instrument(skip_all, name = "ts.recording.create", fields(room_id = %room_id))]
    pub async fn create(
        &self,
        lifetime: CancellationToken,
        room_id: RoomId,
    ) -> anyhow::Result<RecordingTracker> {
        let session = SignalMultiplexer::connect(&self.signal)
            .await
            .with_context(|| format!("dialing SFU for room {room_id}"))?;
        let session = Arc::new(session);

        let (events_tx, events_rx) = mpsc::channel(SESSION_EVENT_BUFFER);
        {
            let tx = events_tx.clone();
            session.on_offer(move |offer| {
                if tx.try_send(SessionEvent::Offer(offer)).is_err() {
                    warn!(target: "ts.recording", "Recorder busy, dropping renegotiation offer");
                }
            });
        }
        session.on_trickle(move |trickle| {
            if events_tx.try_send(SessionEvent::Trickle(trickle)).is_err() {
                debug!(target: "ts.recording", "Recorder busy, dropping candidate");
            }
        });

        match self.join(&session, &lifetime, &room_id).await {
            Ok(media) => {
                let started_at = Utc::now();
                let stopping = lifetime.child_token();

                let worker = Worker {
                    room_id: room_id.clone(),
                    session: Arc::clone(&session),
                    media,
                    events: events_rx,
                    stopping: stopping.clone(),
                    jobs: Arc::clone(&self.jobs),
                    started_at,
                };
                let worker = tokio::spawn(worker.run());

                info!(target: "ts.recording", room_id = %room_id, "Recorder joined room");
                Ok(RecordingTracker {
                    room_id,
                    session,
                    stopping,
                    worker: Some(worker),
                })
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    debug!(target: "ts.recording", error = %close_err, "Failed to close SFU session");
                }
                Err(e)
            }
        }
    }

    /// Join the room, negotiating media if an engine is attached.
    ///
    /// A media session opened here is closed again if the join fails.
    async fn join(
        &self,
        session: &SignalMultiplexer,
        lifetime: &CancellationToken,
        room_id: &RoomId,
    ) -> anyhow::Result<Option<Box<dyn MediaSession>>> {
        let mut media = match &self.media {
            Some(engine) => Some(
                engine
                    .open(room_id)
                    .await
                    .context("opening media session")?,
            ),
            None => None,
        };

        let negotiated = self.negotiate(session, lifetime, room_id, media.as_deref_mut()).await;
        if let Err(e) = negotiated {
            if let Some(media) = media.as_mut() {
                if let Err(close_err) = media.close().await {
                    debug!(target: "ts.recording", room_id = %room_id, error = format!("{close_err:#}"), "Failed to close media session");
                }
            }
            return Err(e);
        }

        Ok(media)
    }

    async fn negotiate(
        &self,
        session: &SignalMultiplexer,
        lifetime: &CancellationToken,
        room_id: &RoomId,
        mut media: Option<&mut (dyn MediaSession + 'static)>,
    ) -> anyhow::Result<()> {
        let offer = match media.as_mut() {
            Some(media) => Some(media.create_offer().await.context("creating offer")?),
            None => None,
        };

        let request = JoinRequest {
            room_id: room_id.clone(),
            uid: self.uid.clone(),
            offer,
            no_publish: true,
            no_subscribe: false,
        };
        let answer = session
            .join(request, lifetime)
            .await
            .with_context(|| format!("joining room {room_id}"))?;

        if let Some(media) = media {
            media
                .apply_answer(answer)
                .await
                .context("applying join answer")?;
        }

        Ok(())
    }
}

/// A live room recorder.
pub struct RecordingTracker {
    room_id: RoomId,
    session: Arc<SignalMultiplexer>,
    /// Child of the runtime lifetime; canceled first on close.
    stopping: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

#[async_trait]
impl Tracker for RecordingTracker {
    async fn close(&mut self) -> anyhow::Result<()> {
        self.stopping.cancel();
        let closed = self.session.close().await;

        if let Some(worker) = self.worker.take() {
            match tokio::time::timeout(WORKER_STOP_TIMEOUT, worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(target: "ts.recording", room_id = %self.room_id, error = %e, "Recorder worker failed");
                }
                Err(_) => {
                    warn!(target: "ts.recording", room_id = %self.room_id, "Recorder worker did not stop in time");
                }
            }
        }

        closed.with_context(|| format!("closing SFU session for room {}", self.room_id))
    }
}

struct Worker {
    room_id: RoomId,
    session: Arc<SignalMultiplexer>,
    media: Option<Box<dyn MediaSession>>,
    events: mpsc::Receiver<SessionEvent>,
    stopping: CancellationToken,
    jobs: Arc<dyn JobQueue>,
    started_at: DateTime<Utc>,
}

impl Worker {
    async fn run(mut self) {
        let outcome = loop {
            tokio::select! {
                biased;
                () = self.stopping.cancelled() => break JobOutcome::Completed,
                () = self.session.closed() => {
                    // Our own close also ends the session
                    if self.stopping.is_cancelled() {
                        break JobOutcome::Completed;
                    }
                    warn!(target: "ts.recording", room_id = %self.room_id, "SFU session ended");
                    break JobOutcome::Failed;
                }
                Some(event) = self.events.recv() => self.handle(event).await,
            }
        };

        if let Some(media) = self.media.as_mut() {
            if let Err(e) = media.close().await {
                warn!(target: "ts.recording", room_id = %self.room_id, error = format!("{e:#}"), "Failed to close media session");
            }
        }

        let job = RecordingJob {
            job_id: Uuid::new_v4(),
            room_id: self.room_id.clone(),
            role: Role::record(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcome,
        };
        let job_id = job.job_id;
        if let Err(e) = self.jobs.put(job).await {
            warn!(target: "ts.recording", room_id = %self.room_id, error = %e, "Failed to enqueue recording job");
        }

        info!(
            target: "ts.recording",
            room_id = %self.room_id,
            job_id = %job_id,
            outcome = outcome.as_str(),
            "Recorder stopped"
        );
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Offer(offer) => {
                let Some(media) = self.media.as_mut() else {
                    warn!(target: "ts.recording", room_id = %self.room_id, "No media engine, ignoring renegotiation offer");
                    return;
                };
                let answer = match media.answer_offer(offer).await {
                    Ok(answer) => answer,
                    Err(e) => {
                        warn!(target: "ts.recording", room_id = %self.room_id, error = format!("{e:#}"), "Failed to answer offer");
                        return;
                    }
                };
                if let Err(e) = self.session.answer(answer).await {
                    warn!(target: "ts.recording", room_id = %self.room_id, error = %e, "Failed to send answer");
                }
            }
            SessionEvent::Trickle(trickle) => {
                let Some(media) = self.media.as_mut() else {
                    debug!(target: "ts.recording", room_id = %self.room_id, "No media engine, ignoring candidate");
                    return;
                };
                if let Err(e) = media.add_ice_candidate(trickle).await {
                    debug!(target: "ts.recording", room_id = %self.room_id, error = format!("{e:#}"), "Failed to add candidate");
                }
            }
        }
    }
}
