//! # Tracker Test Utilities
//!
//! Shared test utilities for the Tracker Service (TS).
//!
//! ## Modules
//!
//! - `mock_sfu` - Mock SFU signal endpoint on an ephemeral localhost port
//! - `fixtures` - Counting trackers, collecting job queue, mock media engine
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tracker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let runtime = TrackerRuntime::new(CancellationToken::new());
//!     let probe = TrackerProbe::new();
//!
//!     runtime
//!         .start_tracker(&room("room-1"), &record_role(), expires_in(60), probe.factory())
//!         .await
//!         .unwrap();
//!     assert_eq!(probe.creates(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_sfu;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_sfu::*;
