//! Media seam for the recorder.
//!
//! The recorder drives signaling; a [`MediaEngine`] owns the peer
//! connection and the track writers behind it.

use async_trait::async_trait;
use common::types::RoomId;
use signal_protocol::{SessionDescription, Trickle};

/// Opens one media session per recorded room.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn open(&self, room_id: &RoomId) -> anyhow::Result<Box<dyn MediaSession>>;
}

/// Peer connection state for one recording.
#[async_trait]
pub trait MediaSession: Send {
    /// Offer sent with the join request.
    async fn create_offer(&mut self) -> anyhow::Result<SessionDescription>;

    /// Apply the SFU's answer to our offer.
    async fn apply_answer(&mut self, answer: SessionDescription) -> anyhow::Result<()>;

    /// Answer an SFU renegotiation offer.
    async fn answer_offer(&mut self, offer: SessionDescription)
        -> anyhow::Result<SessionDescription>;

    async fn add_ice_candidate(&mut self, trickle: Trickle) -> anyhow::Result<()>;

    /// Flush writers and tear down the peer connection.
    async fn close(&mut self) -> anyhow::Result<()>;
}
