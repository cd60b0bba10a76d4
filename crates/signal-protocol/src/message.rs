//! Signal message types.
//!
//! SDP and ICE candidate strings are carried verbatim; nothing in this
//! crate inspects them.

use common::types::RoomId;
use serde::{Deserialize, Serialize};

/// Correlation id of a signal message.
pub type RequestId = u64;

/// Id carried by notifications and fire-and-forget sends.
pub const UNCORRELATED: RequestId = 0;

/// Kind of session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// Offer.
    Offer,
    /// Provisional answer.
    Pranswer,
    /// Final answer.
    Answer,
    /// Rollback of a pending offer.
    Rollback,
}

/// Opaque session description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description kind.
    #[serde(rename = "type")]
    pub kind: SdpKind,
    /// Raw SDP.
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description.
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description.
    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Which of the two SFU peer connections a candidate belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalTarget {
    /// Upstream (tracker → SFU) connection.
    Publisher,
    /// Downstream (SFU → tracker) connection.
    Subscriber,
}

/// ICE candidate as exchanged by browsers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Index of the m-line the candidate is for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
    /// ICE username fragment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Trickled ICE candidate with its target connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trickle {
    /// The candidate.
    pub candidate: IceCandidate,
    /// Connection the candidate applies to.
    pub target: SignalTarget,
}

/// Request to join a room on the SFU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Room (SFU session) to join.
    pub room_id: RoomId,
    /// Participant id the SFU will know this peer by.
    pub uid: String,
    /// Publisher offer, absent for receive-only peers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    /// Do not publish any tracks.
    #[serde(default)]
    pub no_publish: bool,
    /// Do not subscribe to other participants' tracks.
    #[serde(default)]
    pub no_subscribe: bool,
}

/// Error reported by the SFU in reply to a correlated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// SFU error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

/// Payload of a signal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum SignalPayload {
    /// Join a room (correlated, replied to with `Answer`).
    Join(JoinRequest),
    /// Session offer: correlated when sent by the tracker, a
    /// renegotiation notification when sent by the SFU.
    Offer(SessionDescription),
    /// Session answer.
    Answer(SessionDescription),
    /// Trickled ICE candidate.
    Trickle(Trickle),
    /// Error reply to a correlated request.
    Error(ErrorBody),
}

impl SignalPayload {
    /// Method name for logging and metric labels.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            SignalPayload::Join(_) => "join",
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::Trickle(_) => "trickle",
            SignalPayload::Error(_) => "error",
        }
    }
}

/// A framed signal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMessage {
    /// Correlation id, [`UNCORRELATED`] for notifications.
    #[serde(default)]
    pub id: RequestId,
    /// Message body.
    #[serde(flatten)]
    pub payload: SignalPayload,
}

impl SignalMessage {
    /// Build a correlated request.
    #[must_use]
    pub const fn request(id: RequestId, payload: SignalPayload) -> Self {
        Self { id, payload }
    }

    /// Build an uncorrelated notification.
    #[must_use]
    pub const fn notification(payload: SignalPayload) -> Self {
        Self {
            id: UNCORRELATED,
            payload,
        }
    }

    /// Whether this message carries a correlation id.
    #[must_use]
    pub const fn is_correlated(&self) -> bool {
        self.id != UNCORRELATED
    }
}
