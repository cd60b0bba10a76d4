//! HTTP routes for the Tracker Service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::recording::{RecordingFactory, RecordingTracker};
use crate::runtime::TrackerRuntime;

use axum::{routing::post, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Bound on a single API request. Covers a recorder dial plus join.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry of live recorders.
    pub runtime: Arc<TrackerRuntime<RecordingTracker>>,

    /// Builds recorders on start.
    pub factory: RecordingFactory,

    /// Service configuration.
    pub config: Config,
}

/// Build the tracker API routes.
///
/// Creates an Axum router with:
/// - `POST /v1/trackers/start`
/// - `POST /v1/trackers/stop`
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/v1/trackers/start", post(handlers::start_tracker))
        .route("/v1/trackers/stop", post(handlers::stop_tracker))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer - Timeout the request (innermost)
    // 2. TraceLayer - Log request details
    api_routes
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
