//! Mock SFU signal endpoint for recorder testing.
//!
//! Listens on an ephemeral localhost port and speaks the framed signal
//! protocol. It can be configured to:
//! - Answer joins, or reject them with an error reply
//! - Stay silent on joins (to exercise timeouts)
//! - Push renegotiation offers and trickled candidates to every session
//! - Drop every session (to simulate the SFU going away)
//!
//! # Example
//!
//! ```rust,ignore
//! use tracker_test_utils::MockSfu;
//!
//! let sfu = MockSfu::builder().answer_sdp("v=0 mock").build().await;
//! let config = sfu.signal_config();
//! // Hand `config` to a RecordingFactory...
//! ```

use futures::{SinkExt, StreamExt};
use signal_protocol::{
    ErrorBody, SessionDescription, SignalCodec, SignalMessage, SignalPayload, Trickle,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracker_service::signal::SignalConfig;

/// How the mock replies to a join.
#[derive(Debug, Clone)]
enum JoinBehavior {
    Answer(String),
    Reject { code: i32, message: String },
    Silent,
}

#[derive(Default)]
struct State {
    received: Vec<SignalMessage>,
    sessions: Vec<mpsc::UnboundedSender<SignalMessage>>,
    connections: usize,
}

/// Mock SFU listening on localhost.
pub struct MockSfu {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    /// Canceling drops the listener and every session.
    shutdown: CancellationToken,
    session_shutdown: Arc<Mutex<CancellationToken>>,
}

impl MockSfu {
    /// Create a new MockSfu builder.
    #[must_use]
    pub fn builder() -> MockSfuBuilder {
        MockSfuBuilder::default()
    }

    /// Start a mock that answers every join.
    pub async fn start() -> Self {
        Self::builder().build().await
    }

    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal settings pointing at this mock with short timeouts.
    #[must_use]
    pub fn signal_config(&self) -> SignalConfig {
        SignalConfig {
            address: self.addr.to_string(),
            dial_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        }
    }

    /// Number of accepted connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections
    }

    /// Every message received so far, across sessions.
    #[must_use]
    pub fn received(&self) -> Vec<SignalMessage> {
        self.state.lock().unwrap().received.clone()
    }

    /// Number of join requests received.
    #[must_use]
    pub fn join_count(&self) -> usize {
        self.received()
            .iter()
            .filter(|m| matches!(m.payload, SignalPayload::Join(_)))
            .count()
    }

    /// Push a renegotiation offer to every open session.
    pub fn push_offer(&self, sdp: impl Into<String>) {
        self.broadcast(&SignalMessage::notification(SignalPayload::Offer(
            SessionDescription::offer(sdp),
        )));
    }

    /// Push a trickled candidate to every open session.
    pub fn push_trickle(&self, trickle: Trickle) {
        self.broadcast(&SignalMessage::notification(SignalPayload::Trickle(trickle)));
    }

    /// Close every open session; the listener keeps accepting.
    pub fn drop_sessions(&self) {
        let mut token = self.session_shutdown.lock().unwrap();
        token.cancel();
        *token = self.shutdown.child_token();
        self.state.lock().unwrap().sessions.clear();
    }

    /// Poll until `predicate` holds on the received messages.
    ///
    /// # Panics
    ///
    /// Panics if it does not hold within `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F)
    where
        F: Fn(&[SignalMessage]) -> bool,
    {
        let result = tokio::time::timeout(timeout, async {
            loop {
                if predicate(&self.received()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "MockSfu condition not met within {timeout:?}");
    }

    fn broadcast(&self, message: &SignalMessage) {
        let state = self.state.lock().unwrap();
        for session in &state.sessions {
            let _ = session.send(message.clone());
        }
    }
}

impl Drop for MockSfu {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for `MockSfu`.
#[derive(Debug, Clone)]
pub struct MockSfuBuilder {
    join: JoinBehavior,
}

impl Default for MockSfuBuilder {
    fn default() -> Self {
        Self {
            join: JoinBehavior::Answer("v=0 mock-answer".to_string()),
        }
    }
}

impl MockSfuBuilder {
    /// Answer joins and offers with this SDP.
    #[must_use]
    pub fn answer_sdp(mut self, sdp: impl Into<String>) -> Self {
        self.join = JoinBehavior::Answer(sdp.into());
        self
    }

    /// Reply to joins with an error.
    #[must_use]
    pub fn reject_join(mut self, code: i32, message: impl Into<String>) -> Self {
        self.join = JoinBehavior::Reject {
            code,
            message: message.into(),
        };
        self
    }

    /// Never reply to joins.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.join = JoinBehavior::Silent;
        self
    }

    /// Bind the listener and start accepting.
    pub async fn build(self) -> MockSfu {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = CancellationToken::new();
        let session_shutdown = Arc::new(Mutex::new(shutdown.child_token()));

        tokio::spawn(accept_loop(
            listener,
            self.join,
            Arc::clone(&state),
            shutdown.clone(),
            Arc::clone(&session_shutdown),
        ));

        MockSfu {
            addr,
            state,
            shutdown,
            session_shutdown,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    join: JoinBehavior,
    state: Arc<Mutex<State>>,
    shutdown: CancellationToken,
    session_shutdown: Arc<Mutex<CancellationToken>>,
) {
    loop {
        let stream = tokio::select! {
            () = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(_) => return,
            },
        };

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        {
            let mut state = state.lock().unwrap();
            state.connections += 1;
            state.sessions.push(push_tx);
        }
        let token = session_shutdown.lock().unwrap().clone();

        tokio::spawn(serve_session(
            stream,
            join.clone(),
            Arc::clone(&state),
            push_rx,
            token,
        ));
    }
}

async fn serve_session(
    stream: TcpStream,
    join: JoinBehavior,
    state: Arc<Mutex<State>>,
    mut push_rx: mpsc::UnboundedReceiver<SignalMessage>,
    token: CancellationToken,
) {
    let mut framed = Framed::new(stream, SignalCodec::new());

    loop {
        tokio::select! {
            () = token.cancelled() => return,
            pushed = push_rx.recv() => match pushed {
                Some(message) => {
                    if framed.send(message).await.is_err() {
                        return;
                    }
                }
                None => return,
            },
            inbound = framed.next() => {
                let Some(Ok(message)) = inbound else {
                    return;
                };
                state.lock().unwrap().received.push(message.clone());

                let reply = match (&message.payload, &join) {
                    (SignalPayload::Join(_), JoinBehavior::Answer(sdp))
                    | (SignalPayload::Offer(_), JoinBehavior::Answer(sdp)) => Some(SignalPayload::Answer(
                        SessionDescription::answer(sdp.clone()),
                    )),
                    (SignalPayload::Join(_), JoinBehavior::Reject { code, message }) => {
                        Some(SignalPayload::Error(ErrorBody {
                            code: *code,
                            message: message.clone(),
                        }))
                    }
                    _ => None,
                };

                if let Some(payload) = reply.filter(|_| message.is_correlated()) {
                    if framed.send(SignalMessage::request(message.id, payload)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
