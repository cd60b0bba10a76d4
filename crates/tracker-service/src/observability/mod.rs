//! Observability module for the Tracker Service
//!
//! Implements metrics and health probes per ADR-0011 (Observability Framework).
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `ts_tracker_starts_total` | Counter | `result` | Start calls by outcome |
//! | `ts_tracker_closes_total` | Counter | `reason` | Completed tracker closes |
//! | `ts_tracker_close_errors_total` | Counter | none | Tracker close failures (logged, not propagated) |
//! | `ts_tracker_entries` | Gauge | none | Entries currently registered, in any status |
//! | `ts_gc_sweep_duration_seconds` | Histogram | none | GC sweep time including closes |
//! | `ts_gc_evictions_total` | Counter | none | Entries removed by GC |
//! | `ts_signal_request_duration_seconds` | Histogram | `kind`, `outcome` | Correlated request latency |
//! | `ts_signal_unwanted_replies_total` | Counter | none | Replies nobody was waiting for |
//! | `ts_jobs_emitted_total` | Counter | `outcome` | Recording jobs put on the queue |
//!
//! Labels are bounded by code (no room ids or roles in labels).

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
