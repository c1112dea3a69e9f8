//! Broadcasting of job progress for pollers and SSE bridges.

pub mod job_progress;

pub use job_progress::{JobProgressBroadcaster, JobProgressEvent};
