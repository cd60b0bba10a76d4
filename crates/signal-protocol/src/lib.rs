//! Signaling protocol spoken between Dark Tower trackers and the SFU.
//!
//! Messages are tagged unions (`join`, `offer`, `answer`, `trickle`,
//! `error`) carried as length-prefixed JSON frames over one duplex stream.
//! Correlated requests carry a non-zero id that the SFU echoes on its
//! reply; notifications carry id 0.

#![warn(clippy::pedantic)]

pub mod codec;
pub mod message;

pub use codec::{CodecError, SignalCodec};
pub use message::{
    ErrorBody, IceCandidate, JoinRequest, RequestId, SdpKind, SessionDescription, SignalMessage,
    SignalPayload, SignalTarget, Trickle, UNCORRELATED,
};
