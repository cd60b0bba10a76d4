//! Tracker Service
//!
//! Keeps one recorder alive per room while callers keep renewing it.
//!
//! # Architecture
//!
//! The Tracker Service runs one HTTP server (default: 0.0.0.0:8090) serving:
//! - `POST /v1/trackers/start`, `POST /v1/trackers/stop`
//! - `/health`, `/ready`
//! - `/metrics`
//!
//! # Startup
//!
//! 1. Initialize tracing
//! 2. Load configuration
//! 3. Initialize Prometheus metrics recorder (ADR-0011)
//! 4. Create the tracker runtime and spawn its GC loop
//! 5. Spawn the recording job publisher
//! 6. Bind and start the HTTP server
//! 7. Wait for shutdown signal
//!
//! # Shutdown
//!
//! Readiness drops first, then the root token is canceled. The GC loop
//! closes every recorder (bounded by `TS_SHUTDOWN_GRACE_SECONDS`) before the
//! HTTP server and job publisher stop.

#![warn(clippy::pedantic)]

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracker_service::config::Config;
use tracker_service::jobs::{run_job_publisher, ChannelJobQueue};
use tracker_service::observability::{health_router, metrics::init_metrics_recorder, HealthState};
use tracker_service::recording::RecordingFactory;
use tracker_service::routes::{build_routes, AppState};
use tracker_service::runtime::TrackerRuntime;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker_service=debug,ts=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Tracker Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        http_bind_address = %config.http_bind_address,
        sfu_signal_address = %config.signal.address,
        gc_period_ms = config.gc_period.as_millis(),
        default_expire_ms = config.default_expire.as_millis(),
        max_expire_ms = config.max_expire.as_millis(),
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder (ADR-0011)
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new(config.instance_id.clone()));

    // Root of every tracker lifetime; canceling it drains the runtime
    let root_token = CancellationToken::new();
    let runtime = Arc::new(TrackerRuntime::new(root_token.clone()));

    let runtime_task = {
        let runtime = Arc::clone(&runtime);
        let gc_period = config.gc_period;
        tokio::spawn(async move { runtime.run(gc_period).await })
    };

    // Jobs are published until the runtime has drained
    let publisher_token = CancellationToken::new();
    let (job_queue, job_receiver) = ChannelJobQueue::new(config.job_queue_capacity);
    let publisher_task = tokio::spawn(run_job_publisher(job_receiver, publisher_token.clone()));

    let factory = RecordingFactory::new(
        config.signal.clone(),
        format!("recorder-{}", config.instance_id),
        Arc::new(job_queue),
    );

    let app_state = Arc::new(AppState {
        runtime: Arc::clone(&runtime),
        factory,
        config: config.clone(),
    });

    // Add /metrics endpoint served by Prometheus exporter
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let app = build_routes(app_state)
        .merge(health_router(Arc::clone(&health_state)))
        .merge(metrics_router);

    // Bind before spawning so startup fails on a bad address
    let http_addr: SocketAddr = config.http_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.http_bind_address, "Invalid HTTP bind address");
        format!("Invalid HTTP bind address: {e}")
    })?;

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %http_addr, "Failed to bind HTTP server");
            format!("Failed to bind HTTP server to {http_addr}: {e}")
        })?;
    info!(addr = %http_addr, "HTTP server bound successfully");

    let http_shutdown_token = CancellationToken::new();
    let http_task = {
        let token = http_shutdown_token.clone();
        tokio::spawn(async move {
            info!(addr = %http_addr, "HTTP server starting");
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                token.cancelled().await;
                info!("HTTP server shutting down");
            });
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server failed");
            }
        })
    };

    health_state.set_ready();

    // Wait for shutdown signal
    info!("Tracker Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_not_ready();

    root_token.cancel();
    match tokio::time::timeout(config.shutdown_grace, runtime_task).await {
        Ok(Ok(())) => info!("Tracker runtime drained"),
        Ok(Err(e)) => warn!(error = %e, "Tracker runtime task failed"),
        Err(_) => warn!(
            grace_seconds = config.shutdown_grace.as_secs(),
            "Tracker runtime did not drain within grace period"
        ),
    }

    http_shutdown_token.cancel();
    if let Err(e) = http_task.await {
        warn!(error = %e, "HTTP server task failed");
    }

    publisher_token.cancel();
    if let Err(e) = publisher_task.await {
        warn!(error = %e, "Job publisher task failed");
    }

    info!("Tracker Service shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
