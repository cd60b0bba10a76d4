//! Tracker Service error types.
//!
//! `RuntimeError` and `SignalError` are the library-level taxonomies of the
//! tracker runtime and the SFU signal multiplexer. `TsError` is the HTTP
//! facing error: it maps to status codes via `IntoResponse` and never leaks
//! internal details to clients. Actual errors are logged server-side.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use signal_protocol::{CodecError, RequestId};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by the tracker runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime has begun (or finished) shutting down.
    #[error("Tracker runtime is closed")]
    Closed,

    /// No tracker is registered for the key.
    #[error("Tracker not found: {0}")]
    NotFound(String),

    /// The tracker factory failed; the entry is parked for retry.
    #[error("Tracker factory failed: {0:#}")]
    Factory(anyhow::Error),
}

/// Errors returned by the SFU signal multiplexer.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The SFU could not be reached.
    #[error("Failed to dial SFU at {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// The SFU did not accept the connection within the dial timeout.
    #[error("Timed out dialing SFU at {0}")]
    DialTimeout(String),

    /// No reply arrived within the request timeout.
    #[error("Signal request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller canceled, or a newer request of the same kind replaced
    /// this one.
    #[error("Signal request canceled")]
    Canceled,

    /// The stream ended or the session was closed.
    #[error("Signal connection closed")]
    ConnectionClosed,

    /// A reply was delivered to a slot waiting on a different id.
    #[error("Unexpected reply: expected id {expected}, got {actual}")]
    UnexpectedReply { expected: RequestId, actual: RequestId },

    /// The SFU answered the request with an error.
    #[error("SFU error {code}: {message}")]
    Remote { code: i32, message: String },

    /// The SFU replied with a payload of the wrong kind.
    #[error("Invalid reply: {0}")]
    InvalidReply(String),

    /// A frame could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Errors returned by the job queue.
#[derive(Debug, Error)]
pub enum JobError {
    /// The consumer side of the queue has gone away.
    #[error("Job queue closed")]
    QueueClosed,

    /// The queue is full.
    #[error("Job queue full")]
    QueueFull,
}

/// HTTP facing error type.
///
/// Maps to HTTP status codes:
/// - BadRequest: 400 Bad Request
/// - NotFound: 404 Not Found
/// - TrackerFailed: 502 Bad Gateway
/// - ServiceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum TsError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tracker failed to start: {0}")]
    TrackerFailed(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal server error")]
    Internal,
}

impl TsError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            TsError::BadRequest(_) => 400,
            TsError::NotFound(_) => 404,
            TsError::Internal => 500,
            TsError::TrackerFailed(_) => 502,
            TsError::ServiceUnavailable(_) => 503,
        }
    }
}

impl From<RuntimeError> for TsError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Closed => TsError::ServiceUnavailable(err.to_string()),
            RuntimeError::NotFound(key) => TsError::NotFound(key),
            RuntimeError::Factory(e) => TsError::TrackerFailed(format!("{e:#}")),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for TsError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            TsError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            TsError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Tracker not found".to_string(),
            ),
            TsError::TrackerFailed(reason) => {
                tracing::warn!(target: "ts.handlers", reason = %reason, "Tracker failed to start");
                (
                    StatusCode::BAD_GATEWAY,
                    "TRACKER_FAILED",
                    "Tracker failed to start, retry later".to_string(),
                )
            }
            TsError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "ts.handlers", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service is shutting down".to_string(),
                )
            }
            TsError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_error_mapping() {
        assert_eq!(TsError::from(RuntimeError::Closed).status_code(), 503);
        assert_eq!(
            TsError::from(RuntimeError::NotFound("room-1/record".to_string())).status_code(),
            404
        );
        assert_eq!(
            TsError::from(RuntimeError::Factory(anyhow::anyhow!("dial failed"))).status_code(),
            502
        );
    }

    #[test]
    fn test_factory_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("connection refused").context("joining room-1");
        let err = RuntimeError::Factory(cause);
        assert_eq!(
            err.to_string(),
            "Tracker factory failed: joining room-1: connection refused"
        );
    }

    #[test]
    fn test_signal_error_display() {
        assert_eq!(
            SignalError::UnexpectedReply {
                expected: 4,
                actual: 3
            }
            .to_string(),
            "Unexpected reply: expected id 4, got 3"
        );
        assert_eq!(
            SignalError::Remote {
                code: 404,
                message: "room closed".to_string()
            }
            .to_string(),
            "SFU error 404: room closed"
        );
    }

    #[tokio::test]
    async fn test_error_response_hides_internal_reason() {
        let response =
            TsError::TrackerFailed("dial 10.0.0.7:7000 refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(!text.contains("10.0.0.7"));
        assert!(text.contains("TRACKER_FAILED"));
    }
}
