//! Request/reply multiplexing over one framed signal stream.

use super::SignalConfig;
use crate::errors::SignalError;
use crate::observability::metrics;

use futures::{SinkExt, StreamExt};
use signal_protocol::{
    CodecError, JoinRequest, RequestId, SessionDescription, SignalCodec, SignalMessage,
    SignalPayload, Trickle, UNCORRELATED,
};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

type BoxedReader = FramedRead<Box<dyn AsyncRead + Send + Unpin>, SignalCodec>;
type BoxedWriter = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, SignalCodec>;
type ReplySender = oneshot::Sender<Result<SignalMessage, SignalError>>;

/// Handler for SFU-initiated renegotiation offers.
pub type OfferCallback = Arc<dyn Fn(SessionDescription) + Send + Sync>;

/// Handler for trickled ICE candidates.
pub type TrickleCallback = Arc<dyn Fn(Trickle) + Send + Sync>;

/// Correlated request kinds, one reply slot each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Join,
    Offer,
}

impl RequestKind {
    const fn as_str(self) -> &'static str {
        match self {
            RequestKind::Join => "join",
            RequestKind::Offer => "offer",
        }
    }
}

/// Pending reply slots.
#[derive(Default)]
struct Slots {
    join: Option<(RequestId, ReplySender)>,
    offer: Option<(RequestId, ReplySender)>,
}

impl Slots {
    fn slot_mut(&mut self, kind: RequestKind) -> &mut Option<(RequestId, ReplySender)> {
        match kind {
            RequestKind::Join => &mut self.join,
            RequestKind::Offer => &mut self.offer,
        }
    }

    /// Remove and return the slot waiting on `id`, if any.
    fn take_matching(&mut self, id: RequestId) -> Option<(RequestKind, ReplySender)> {
        for kind in [RequestKind::Join, RequestKind::Offer] {
            let slot = self.slot_mut(kind);
            if slot.as_ref().is_some_and(|(pending, _)| *pending == id) {
                return slot.take().map(|(_, tx)| (kind, tx));
            }
        }
        None
    }
}

#[derive(Default)]
struct Callbacks {
    on_offer: Option<OfferCallback>,
    on_trickle: Option<TrickleCallback>,
}

/// State shared with the reader task.
struct Shared {
    peer: String,
    slots: StdMutex<Slots>,
    callbacks: RwLock<Callbacks>,
    /// Canceled once the stream has ended or the session was closed.
    session: CancellationToken,
}

impl Shared {
    fn slots(&self) -> StdMutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the session closed and fail every pending waiter.
    fn shut_down(&self) {
        self.session.cancel();
        let mut slots = self.slots();
        for (_, tx) in [slots.join.take(), slots.offer.take()].into_iter().flatten() {
            let _ = tx.send(Err(SignalError::ConnectionClosed));
        }
    }

    /// Route one inbound message to its waiter or callback.
    fn dispatch(&self, message: SignalMessage) {
        if message.is_correlated() {
            let pending = self.slots().take_matching(message.id);
            if let Some((kind, tx)) = pending {
                let id = message.id;
                if tx.send(Ok(message)).is_err() {
                    self.unwanted_reply(id, kind.as_str());
                }
                return;
            }
        }

        match message.payload {
            SignalPayload::Offer(description) => {
                let callback = self
                    .callbacks
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_offer
                    .clone();
                match callback {
                    Some(callback) => callback(description),
                    None => debug!(target: "ts.signal", peer = %self.peer, "No offer handler, dropping offer"),
                }
            }
            SignalPayload::Trickle(trickle) => {
                let callback = self
                    .callbacks
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_trickle
                    .clone();
                match callback {
                    Some(callback) => callback(trickle),
                    None => debug!(target: "ts.signal", peer = %self.peer, "No trickle handler, dropping candidate"),
                }
            }
            payload if message.id != UNCORRELATED => self.unwanted_reply(message.id, payload.method()),
            payload => {
                debug!(
                    target: "ts.signal",
                    peer = %self.peer,
                    method = payload.method(),
                    "Dropping unsolicited message"
                );
            }
        }
    }

    fn unwanted_reply(&self, id: RequestId, method: &'static str) {
        warn!(
            target: "ts.signal",
            peer = %self.peer,
            id,
            method,
            "Unwanted reply, no waiter for id"
        );
        metrics::record_signal_unwanted_reply();
    }
}

/// Write side, guarded by the write lock.
struct Writer {
    /// `None` once closed.
    sink: Option<BoxedWriter>,
    next_id: RequestId,
    /// Taken by the first send, which starts the reader task.
    reader: Option<BoxedReader>,
}

/// Request/reply client over one duplex stream to the SFU.
pub struct SignalMultiplexer {
    writer: Mutex<Writer>,
    shared: Arc<Shared>,
    request_timeout: Duration,
}

impl SignalMultiplexer {
    /// Dial the SFU.
    ///
    /// # Errors
    ///
    /// - `SignalError::Dial` - the connection was refused or failed
    /// - `SignalError::DialTimeout` - no connection within `dial_timeout`
    #[instrument(skip_all, name = "ts.signal.connect", fields(peer = %config.address))]
    pub async fn connect(config: &SignalConfig) -> Result<Self, SignalError> {
        let stream =
            match tokio::time::timeout(config.dial_timeout, TcpStream::connect(&config.address))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    return Err(SignalError::Dial {
                        addr: config.address.clone(),
                        reason: e.to_string(),
                    })
                }
                Err(_) => return Err(SignalError::DialTimeout(config.address.clone())),
            };

        if let Err(e) = stream.set_nodelay(true) {
            debug!(target: "ts.signal", error = %e, "Failed to set TCP_NODELAY");
        }

        info!(target: "ts.signal", "Connected to SFU");
        Ok(Self::new(
            stream,
            config.address.clone(),
            config.request_timeout,
        ))
    }

    /// Wrap an already established duplex stream.
    pub fn new<S>(stream: S, peer: impl Into<String>, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        let reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(read);
        let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write);

        Self {
            writer: Mutex::new(Writer {
                sink: Some(FramedWrite::new(writer, SignalCodec::new())),
                next_id: 0,
                reader: Some(FramedRead::new(reader, SignalCodec::new())),
            }),
            shared: Arc::new(Shared {
                peer: peer.into(),
                slots: StdMutex::new(Slots::default()),
                callbacks: RwLock::new(Callbacks::default()),
                session: CancellationToken::new(),
            }),
            request_timeout,
        }
    }

    /// Register the handler for SFU-initiated offers, replacing any previous one.
    pub fn on_offer(&self, callback: impl Fn(SessionDescription) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .on_offer = Some(Arc::new(callback));
    }

    /// Register the handler for trickled candidates, replacing any previous one.
    pub fn on_trickle(&self, callback: impl Fn(Trickle) + Send + Sync + 'static) {
        self.shared
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .on_trickle = Some(Arc::new(callback));
    }

    /// Token canceled when the session ends, by either side.
    pub fn session_token(&self) -> CancellationToken {
        self.shared.session.clone()
    }

    /// Resolves once the session has ended.
    pub async fn closed(&self) {
        self.shared.session.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.shared.session.is_cancelled()
    }

    /// Join a room and return the SFU's answer.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::Canceled` if `cancel` fires or a newer join
    /// supersedes this one, `SignalError::Timeout` if no reply arrives in
    /// time, `SignalError::Remote` if the SFU rejects the join.
    pub async fn join(
        &self,
        request: JoinRequest,
        cancel: &CancellationToken,
    ) -> Result<SessionDescription, SignalError> {
        let reply = self
            .request(RequestKind::Join, SignalPayload::Join(request), cancel)
            .await?;
        expect_answer(reply)
    }

    /// Send a renegotiation offer and return the SFU's answer.
    ///
    /// # Errors
    ///
    /// Same as [`join`](Self::join).
    pub async fn offer(
        &self,
        description: SessionDescription,
        cancel: &CancellationToken,
    ) -> Result<SessionDescription, SignalError> {
        let reply = self
            .request(RequestKind::Offer, SignalPayload::Offer(description), cancel)
            .await?;
        expect_answer(reply)
    }

    /// Answer an SFU-initiated offer.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::ConnectionClosed` if the session is closed.
    pub async fn answer(&self, description: SessionDescription) -> Result<(), SignalError> {
        self.notify(SignalPayload::Answer(description)).await
    }

    /// Trickle a local ICE candidate.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::ConnectionClosed` if the session is closed.
    pub async fn trickle(&self, trickle: Trickle) -> Result<(), SignalError> {
        self.notify(SignalPayload::Trickle(trickle)).await
    }

    /// Close the send direction and release the stream. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the flush error if buffered frames could not be written.
    pub async fn close(&self) -> Result<(), SignalError> {
        let mut writer = self.writer.lock().await;
        let Some(mut sink) = writer.sink.take() else {
            return Ok(());
        };
        writer.reader = None;
        self.shared.shut_down();

        sink.close().await?;
        debug!(target: "ts.signal", peer = %self.shared.peer, "Signal session closed");
        Ok(())
    }

    async fn notify(&self, payload: SignalPayload) -> Result<(), SignalError> {
        let mut writer = self.writer.lock().await;
        self.send_locked(&mut writer, SignalMessage::notification(payload))
            .await
    }

    async fn request(
        &self,
        kind: RequestKind,
        payload: SignalPayload,
        cancel: &CancellationToken,
    ) -> Result<SignalMessage, SignalError> {
        let started = Instant::now();
        let result = self.request_inner(kind, payload, cancel).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(SignalError::Timeout(_)) => "timeout",
            Err(SignalError::Canceled) => "canceled",
            Err(SignalError::ConnectionClosed) => "closed",
            Err(_) => "error",
        };
        metrics::record_signal_request(kind.as_str(), outcome, started.elapsed());

        result
    }

    async fn request_inner(
        &self,
        kind: RequestKind,
        payload: SignalPayload,
        cancel: &CancellationToken,
    ) -> Result<SignalMessage, SignalError> {
        let (tx, rx) = oneshot::channel();

        let id = {
            let mut writer = self.writer.lock().await;
            writer.next_id += 1;
            let id = writer.next_id;

            {
                let mut slots = self.shared.slots();
                // Checked with the slots locked so a concurrent shutdown
                // either sees this slot or we see the shutdown.
                if self.shared.session.is_cancelled() {
                    return Err(SignalError::ConnectionClosed);
                }
                if let Some((previous, superseded)) = slots.slot_mut(kind).replace((id, tx)) {
                    debug!(
                        target: "ts.signal",
                        peer = %self.shared.peer,
                        kind = kind.as_str(),
                        previous,
                        id,
                        "Superseding pending request"
                    );
                    let _ = superseded.send(Err(SignalError::Canceled));
                }
            }

            self.send_locked(&mut writer, SignalMessage::request(id, payload))
                .await?;
            id
        };

        let reply = tokio::select! {
            reply = rx => match reply {
                Ok(reply) => reply?,
                Err(_) => return Err(SignalError::Canceled),
            },
            () = cancel.cancelled() => return Err(SignalError::Canceled),
            () = tokio::time::sleep(self.request_timeout) => {
                return Err(SignalError::Timeout(self.request_timeout));
            }
        };

        if reply.id != id {
            return Err(SignalError::UnexpectedReply {
                expected: id,
                actual: reply.id,
            });
        }
        Ok(reply)
    }

    /// Write one message. Caller holds the write lock.
    async fn send_locked(
        &self,
        writer: &mut Writer,
        message: SignalMessage,
    ) -> Result<(), SignalError> {
        if self.shared.session.is_cancelled() {
            return Err(SignalError::ConnectionClosed);
        }
        if let Some(reader) = writer.reader.take() {
            tokio::spawn(read_loop(reader, Arc::clone(&self.shared)));
        }
        let Some(sink) = writer.sink.as_mut() else {
            return Err(SignalError::ConnectionClosed);
        };

        match sink.send(message).await {
            Ok(()) => Ok(()),
            Err(CodecError::Io(e)) => {
                warn!(
                    target: "ts.signal",
                    peer = %self.shared.peer,
                    error = %e,
                    "Signal write failed, closing session"
                );
                writer.sink = None;
                self.shared.shut_down();
                Err(SignalError::ConnectionClosed)
            }
            // Encoding failed before anything reached the stream
            Err(e) => Err(SignalError::Codec(e)),
        }
    }
}

impl Drop for SignalMultiplexer {
    fn drop(&mut self) {
        // Stops the reader so the stream is released without a close()
        self.shared.shut_down();
    }
}

/// Single reader per session. Exits on stream end, read error or close.
async fn read_loop(mut reader: BoxedReader, shared: Arc<Shared>) {
    loop {
        let next = tokio::select! {
            () = shared.session.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(message)) => shared.dispatch(message),
            Some(Err(e)) => {
                warn!(target: "ts.signal", peer = %shared.peer, error = %e, "Signal read failed");
                break;
            }
            None => {
                info!(target: "ts.signal", peer = %shared.peer, "SFU closed signal stream");
                break;
            }
        }
    }

    shared.shut_down();
}

fn expect_answer(reply: SignalMessage) -> Result<SessionDescription, SignalError> {
    match reply.payload {
        SignalPayload::Answer(description) => Ok(description),
        SignalPayload::Error(body) => Err(SignalError::Remote {
            code: body.code,
            message: body.message,
        }),
        other => Err(SignalError::InvalidReply(format!(
            "expected answer, got {}",
            other.method()
        ))),
    }
}
