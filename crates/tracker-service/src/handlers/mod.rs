//! HTTP request handlers for the Tracker Service.

pub mod trackers;

pub use trackers::{start_tracker, stop_tracker};
