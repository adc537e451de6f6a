use crate::broadcast::job_progress::{JobPhase, JobProgressTracker};
use crate::worker::job::JobStatus;

/// Events emitted while a job is processed.
pub enum ProgressEvent {
    Phase {
        phase: JobPhase,
        message: String,
    },
    Completed {
        item_count: usize,
        duplicate_of: Option<String>,
    },
    Failed {
        status: JobStatus,
        error: String,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Bridges pipeline events onto the broadcast channel.
pub struct BroadcastProgress {
    tracker: JobProgressTracker,
}

impl BroadcastProgress {
    pub fn new(tracker: JobProgressTracker) -> Self {
        Self { tracker }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Phase { phase, message } => {
                self.tracker.update_phase(phase, &message);
            }
            ProgressEvent::Completed {
                item_count,
                duplicate_of,
            } => {
                self.tracker.completed(item_count, duplicate_of.as_deref());
            }
            ProgressEvent::Failed { status, error } => {
                self.tracker.failed(status, &error);
            }
        }
    }
}
