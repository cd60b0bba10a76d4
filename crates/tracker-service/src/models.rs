//! Request and response bodies for the tracker API.

use crate::runtime::TrackerState;

use chrono::{DateTime, Utc};
use common::types::RoomId;
use serde::{Deserialize, Serialize};

/// Body of `POST /v1/trackers/start`.
#[derive(Debug, Clone, Deserialize)]
pub struct StartTrackerRequest {
    pub room_id: String,
    pub role: String,
    /// Lease length. Defaults to the configured lease, clamped to the
    /// configured maximum.
    #[serde(default)]
    pub expire_in_ms: Option<u64>,
    /// Role specific settings. `record` takes none.
    #[serde(default)]
    pub params: Option<serde_json::Value>,
}

/// Body of `POST /v1/trackers/stop`.
#[derive(Debug, Clone, Deserialize)]
pub struct StopTrackerRequest {
    pub room_id: String,
    pub role: String,
}

/// Response to both start and stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerResponse {
    pub room_id: RoomId,
    pub already_exists: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

impl TrackerResponse {
    #[must_use]
    pub fn new(room_id: RoomId, state: TrackerState) -> Self {
        Self {
            room_id,
            already_exists: state.already_exists,
            started_at: state.started_at,
            expires_at: state.expires_at,
        }
    }
}
