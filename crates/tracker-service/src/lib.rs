//! Tracker Service (TS) Library
//!
//! The Tracker Service keeps per-room background work alive: exactly one
//! tracker (today, a room recorder) per `(room, role)`, started and renewed
//! by callers, expired by lease and drained on shutdown.
//!
//! # Architecture
//!
//! ```text
//! HTTP start/stop ──► TrackerRuntime ──► factory ──► RecordingTracker
//!                      │  (registry,                  │
//!                      │   GC, drain)                 ├── SignalMultiplexer ──► SFU
//!                      │                              └── worker ──► JobQueue
//!                      └── lifetime token per entry, canceled on close
//! ```
//!
//! # Key Design Decisions
//!
//! - **Two lock levels**: a registry lock held briefly for map changes, and
//!   a per-entry lock held across the slow factory and close calls
//! - **Lock-free GC scans**: entry status is an atomic, written only under
//!   the entry lock
//! - **One reply slot per request kind**: a newer join or offer cancels the
//!   one still waiting
//! - **No reconnects**: a failed SFU session fails its recorder; the next
//!   start after GC builds a new one
//!
//! # Modules
//!
//! - [`runtime`] - Generic tracker registry with lease expiry and drain
//! - [`signal`] - SFU signaling client
//! - [`recording`] - The `record` role tracker
//! - [`jobs`] - Recording job emission
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP mappings

pub mod config;
pub mod errors;
pub mod handlers;
pub mod jobs;
pub mod models;
pub mod observability;
pub mod recording;
pub mod routes;
pub mod runtime;
pub mod signal;
