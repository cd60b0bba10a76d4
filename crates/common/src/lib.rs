//! Common utilities and types shared across Dark Tower components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
