//! Job progress events, published for any observer (CLI, tests, a future UI).

pub mod job_progress;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
