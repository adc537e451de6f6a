//! Job progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::worker::job::JobStatus;

/// Phase of job processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Extracting,
    Normalizing,
    Classifying,
    Committing,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Extracting => write!(f, "Extracting"),
            JobPhase::Normalizing => write!(f, "Normalizing"),
            JobPhase::Classifying => write!(f, "Classifying"),
            JobPhase::Committing => write!(f, "Committing"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Source file name.
    pub filename: String,
    pub phase: JobPhase,
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Items produced (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_count: Option<usize>,
    /// Set when the job short-circuited to an earlier job's result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, filename: &str, phase: JobPhase, message: &str) -> Self {
        let status = match phase {
            JobPhase::Queued => JobStatus::Pending,
            JobPhase::Completed => JobStatus::Completed,
            JobPhase::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        };

        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            phase,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            item_count: None,
            duplicate_of: None,
            error: None,
        }
    }

    pub fn completed(
        job_id: &str,
        filename: &str,
        item_count: usize,
        duplicate_of: Option<&str>,
    ) -> Self {
        let message = match duplicate_of {
            Some(prior) => format!("Already ingested by job {}", prior),
            None => format!("Ingested {} item(s)", item_count),
        };
        Self {
            item_count: Some(item_count),
            duplicate_of: duplicate_of.map(|s| s.to_string()),
            ..Self::new(job_id, filename, JobPhase::Completed, &message)
        }
    }

    /// `status` is `failed` or `dead`.
    pub fn failed(job_id: &str, filename: &str, status: JobStatus, error: &str) -> Self {
        Self {
            status,
            error: Some(error.to_string()),
            ..Self::new(job_id, filename, JobPhase::Failed, "Processing failed")
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for a job and announces it as queued.
    pub fn start_job(&self, job_id: &str, filename: &str) -> JobProgressTracker {
        let tracker = self.tracker(job_id, filename);
        tracker.update_phase(JobPhase::Queued, "Job queued for processing");
        tracker
    }

    /// Creates a tracker without announcing anything.
    pub fn tracker(&self, job_id: &str, filename: &str) -> JobProgressTracker {
        JobProgressTracker::new(job_id, filename, Arc::clone(&self.sender))
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Tracks progress for a single job.
pub struct JobProgressTracker {
    job_id: String,
    filename: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn new(
        job_id: &str,
        filename: &str,
        sender: Arc<broadcast::Sender<JobProgressEvent>>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            sender,
        }
    }

    pub fn update_phase(&self, phase: JobPhase, message: &str) {
        let event = JobProgressEvent::new(&self.job_id, &self.filename, phase, message);
        let _ = self.sender.send(event);
    }

    pub fn completed(&self, item_count: usize, duplicate_of: Option<&str>) {
        let event =
            JobProgressEvent::completed(&self.job_id, &self.filename, item_count, duplicate_of);
        let _ = self.sender.send(event);
    }

    pub fn failed(&self, status: JobStatus, error: &str) {
        let event = JobProgressEvent::failed(&self.job_id, &self.filename, status, error);
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(
            "job-1",
            "inv.pdf",
            JobPhase::Extracting,
            "Reading PDF",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.phase, JobPhase::Extracting);
        assert_eq!(received.status, JobStatus::Processing);
    }

    #[test]
    fn test_send_without_subscribers_is_ignored() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::new("j", "f", JobPhase::Queued, "q"));
    }

    #[test]
    fn test_start_job_announces_queued() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        let tracker = broadcaster.start_job("job-2", "inv.pdf");
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.phase, JobPhase::Queued);
        assert_eq!(queued.status, JobStatus::Pending);

        tracker.update_phase(JobPhase::Classifying, "Classifying 2 items");
        assert_eq!(rx.try_recv().unwrap().message, "Classifying 2 items");
    }

    #[test]
    fn test_completion_and_failure_events() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();
        let tracker = broadcaster.tracker("job-3", "inv.pdf");

        tracker.completed(2, None);
        let done = rx.try_recv().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.item_count, Some(2));

        tracker.completed(2, Some("job-1"));
        let duplicate = rx.try_recv().unwrap();
        assert_eq!(duplicate.duplicate_of.as_deref(), Some("job-1"));

        tracker.failed(JobStatus::Dead, "Corrupt document: bad xref");
        let failed = rx.try_recv().unwrap();
        assert_eq!(failed.phase, JobPhase::Failed);
        assert_eq!(failed.status, JobStatus::Dead);
        assert!(failed.error.unwrap().contains("bad xref"));
    }
}
