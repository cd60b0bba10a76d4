//! SFU signaling client.
//!
//! [`SignalMultiplexer`] turns one duplex stream to the SFU into a
//! request/reply API. Correlated calls (`join`, `offer`) get a fresh id and
//! a single reply slot per kind; a newer request of the same kind cancels
//! the older one. Unsolicited offers and trickled candidates are handed to
//! registered callbacks by one background reader, started on first send.
//!
//! The multiplexer never reconnects. Once the stream fails or is closed,
//! every pending and subsequent call returns
//! [`SignalError::ConnectionClosed`](crate::errors::SignalError::ConnectionClosed).

mod multiplexer;

pub use multiplexer::{OfferCallback, SignalMultiplexer, TrickleCallback};

use std::time::Duration;

/// Connection settings for the SFU signal endpoint.
#[derive(Debug, Clone)]
pub struct SignalConfig {
    /// `host:port` of the SFU signal listener.
    pub address: String,
    /// Bound on establishing the TCP connection.
    pub dial_timeout: Duration,
    /// Bound on waiting for a correlated reply.
    pub request_timeout: Duration,
}
