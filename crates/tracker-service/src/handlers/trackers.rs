//! Tracker start/stop handlers.
//!
//! - `POST /v1/trackers/start` - Start or renew the tracker for a room and role
//! - `POST /v1/trackers/stop` - Close the tracker for a room and role
//!
//! Only the `record` role is served. Internal failure details are logged
//! and never returned to the caller.

use crate::errors::TsError;
use crate::models::{StartTrackerRequest, StopTrackerRequest, TrackerResponse};
use crate::routes::AppState;

use axum::{extract::State, Json};
use chrono::Utc;
use common::types::{Role, RoomId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Roles this service can start trackers for.
const SUPPORTED_ROLES: &[&str] = &[Role::RECORD];

// ============================================================================
// Handler: POST /v1/trackers/start
// ============================================================================

/// Handler for POST /v1/trackers/start
///
/// # Response
///
/// - 200 OK: Tracker started (`already_exists: false`) or renewed (`true`)
/// - 400 Bad Request: Invalid room id or unsupported role
/// - 502 Bad Gateway: Recorder failed to start, retry later
/// - 503 Service Unavailable: Shutting down
#[instrument(skip_all, name = "ts.handlers.start")]
pub async fn start_tracker(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StartTrackerRequest>,
) -> Result<Json<TrackerResponse>, TsError> {
    let room_id = parse_room_id(request.room_id)?;
    let role = parse_role(request.role)?;

    if request.params.is_some() {
        debug!(target: "ts.handlers", role = %role, "Ignoring params, role takes none");
    }

    let expire_in = lease_for(
        request.expire_in_ms,
        state.config.default_expire,
        state.config.max_expire,
    );
    let expire_at = Utc::now()
        + chrono::Duration::from_std(expire_in).map_err(|_| TsError::Internal)?;

    // Run the start on its own task so a dropped request (client gone,
    // request timeout) cannot abandon a recorder halfway through its join
    let start = {
        let runtime = Arc::clone(&state.runtime);
        let factory = state.factory.clone();
        let room_id = room_id.clone();
        let role = role.clone();
        tokio::spawn(async move {
            runtime
                .start_tracker(&room_id, &role, expire_at, move |lifetime, room_id| async move {
                    factory.create(lifetime, room_id).await
                })
                .await
        })
    };
    let tracker = start.await.map_err(|e| {
        warn!(target: "ts.handlers", room_id = %room_id, error = %e, "Tracker start task failed");
        TsError::Internal
    })??;

    info!(
        target: "ts.handlers",
        room_id = %room_id,
        role = %role,
        already_exists = tracker.already_exists,
        expires_at = %tracker.expires_at,
        "Tracker start handled"
    );

    Ok(Json(TrackerResponse::new(room_id, tracker)))
}

// ============================================================================
// Handler: POST /v1/trackers/stop
// ============================================================================

/// Handler for POST /v1/trackers/stop
///
/// # Response
///
/// - 200 OK: Tracker closed (or already closed)
/// - 400 Bad Request: Invalid room id or unsupported role
/// - 404 Not Found: No tracker for the room and role
/// - 503 Service Unavailable: Shutting down
#[instrument(skip_all, name = "ts.handlers.stop")]
pub async fn stop_tracker(
    State(state): State<Arc<AppState>>,
    Json(request): Json<StopTrackerRequest>,
) -> Result<Json<TrackerResponse>, TsError> {
    let room_id = parse_room_id(request.room_id)?;
    let role = parse_role(request.role)?;

    let tracker = state.runtime.stop_tracker(&room_id, &role).await?;

    info!(target: "ts.handlers", room_id = %room_id, role = %role, "Tracker stopped");

    Ok(Json(TrackerResponse::new(room_id, tracker)))
}

fn parse_room_id(raw: String) -> Result<RoomId, TsError> {
    RoomId::parse(raw).map_err(|e| TsError::BadRequest(e.to_string()))
}

fn parse_role(raw: String) -> Result<Role, TsError> {
    if !SUPPORTED_ROLES.contains(&raw.as_str()) {
        return Err(TsError::BadRequest(format!("Unsupported role: {raw}")));
    }
    Role::parse(raw).map_err(|e| TsError::BadRequest(e.to_string()))
}

/// Requested lease, defaulted when absent or zero and capped at `max`.
fn lease_for(requested_ms: Option<u64>, default: Duration, max: Duration) -> Duration {
    requested_ms
        .filter(|ms| *ms > 0)
        .map_or(default, Duration::from_millis)
        .min(max)
}
