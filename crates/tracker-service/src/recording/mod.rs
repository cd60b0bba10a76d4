//! Room recorder, the tracker behind the `record` role.
//!
//! [`RecordingFactory::create`] dials the SFU, joins the room and spawns a
//! worker that services renegotiation offers and trickled candidates until
//! the tracker is closed or the SFU drops the session. When the worker
//! exits it puts a [`RecordingJob`](crate::jobs::RecordingJob) on the job
//! queue.

mod media;
mod tracker;

pub use media::{MediaEngine, MediaSession};
pub use tracker::{RecordingFactory, RecordingTracker};
