use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::normalizer::{ClassifiedItem, NormalizationError};
use crate::storage::{CommitReceipt, PersistenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Queue tier. Higher tiers are dequeued first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            other => Err(format!("unknown priority '{}'", other)),
        }
    }
}

/// What to ingest and under which declared identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub path: PathBuf,
    pub invoice_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_id: Option<String>,
    /// Auction metadata spreadsheet consulted for rates and dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<PathBuf>,
}

impl SourceRef {
    pub fn new(path: impl Into<PathBuf>, invoice_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            invoice_id: invoice_id.into(),
            auction_id: None,
            metadata_path: None,
        }
    }

    pub fn with_auction_id(mut self, auction_id: impl Into<String>) -> Self {
        self.auction_id = Some(auction_id.into());
        self
    }

    pub fn with_metadata(mut self, path: impl Into<PathBuf>) -> Self {
        self.metadata_path = Some(path.into());
        self
    }

    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Re-process even when the same document already succeeded.
    #[serde(default)]
    pub force: bool,
    /// Run the pipeline without committing items or recording seed state.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    CorruptDocument,
    UnsupportedFormat,
    MissingHeaders,
    SourceUnreadable,
    PersistenceFailure,
    Cancelled,
    Interrupted,
}

impl FailureKind {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnreadable | Self::PersistenceFailure | Self::Interrupted
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CorruptDocument => "corrupt_document",
            Self::UnsupportedFormat => "unsupported_format",
            Self::MissingHeaders => "missing_headers",
            Self::SourceUnreadable => "source_unreadable",
            Self::PersistenceFailure => "persistence_failure",
            Self::Cancelled => "cancelled",
            Self::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
        }
    }

    pub fn from_extraction(err: &ExtractionError) -> Self {
        let kind = match err {
            ExtractionError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            ExtractionError::MissingHeaders { .. } => FailureKind::MissingHeaders,
            _ => FailureKind::CorruptDocument,
        };
        Self::new(kind, err.to_string())
    }

    pub fn from_persistence(err: &PersistenceError) -> Self {
        Self::new(FailureKind::PersistenceFailure, err.to_string())
    }
}

/// Outcome payload of a job; also kept on failed jobs for the records that
/// did succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub item_count: usize,
    pub items: Vec<ClassifiedItem>,
    #[serde(default)]
    pub record_errors: Vec<NormalizationError>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub low_confidence_pages: Vec<u32>,
    /// Job whose result this is, when the document had already been ingested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
    /// Line positions known to be persisted after a partial commit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub durable_positions: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<CommitReceipt>,
    #[serde(default)]
    pub dry_run: bool,
}

impl JobResult {
    pub fn from_items(items: Vec<ClassifiedItem>) -> Self {
        Self {
            item_count: items.len(),
            items,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: String,
    pub source: SourceRef,
    pub options: JobOptions,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub result: Option<JobResult>,
    pub failure: Option<JobFailure>,
    /// Content fingerprint, set once the source has been read.
    pub idempotency_key: Option<String>,
}

impl ImportJob {
    pub fn new(source: SourceRef, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            options,
            status: JobStatus::Pending,
            attempts: 0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            result: None,
            failure: None,
            idempotency_key: None,
        }
    }

    pub fn status_report(&self) -> JobStatusReport {
        let mut warnings = Vec::new();
        if let Some(result) = &self.result {
            warnings.extend(result.warnings.iter().cloned());
            warnings.extend(result.record_errors.iter().map(|e| e.to_string()));
        }
        JobStatusReport {
            job_id: self.id.clone(),
            status: self.status,
            attempts: self.attempts,
            result: self.result.clone(),
            failure: self.failure.clone(),
            warnings,
        }
    }
}

/// Answer to a status query: a definitive status plus itemized warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<JobFailure>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let job = ImportJob::new(
            SourceRef::new("/in/invoice-7.pdf", "INV-7"),
            JobOptions::default(),
        );
        assert!(!job.id.is_empty());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.options.priority, Priority::Normal);
        assert!(job.idempotency_key.is_none());
        assert_eq!(job.source.filename(), "invoice-7.pdf");
    }

    #[test]
    fn test_job_ids_are_unique() {
        let a = ImportJob::new(SourceRef::new("a.pdf", "A"), JobOptions::default());
        let b = ImportJob::new(SourceRef::new("a.pdf", "A"), JobOptions::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!("HIGH".parse::<Priority>(), Ok(Priority::High));
    }

    #[test]
    fn test_status_round_trip_and_terminal() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Dead,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>(), Ok(status));
        }
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Dead.is_terminal());
        assert!(!JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_failure_retryability() {
        let corrupt = JobFailure::from_extraction(&ExtractionError::CorruptDocument(
            "bad xref".to_string(),
        ));
        assert_eq!(corrupt.kind, FailureKind::CorruptDocument);
        assert!(!corrupt.retryable);

        let storage =
            JobFailure::from_persistence(&PersistenceError::Unavailable("locked".to_string()));
        assert!(storage.retryable);

        assert!(!JobFailure::new(FailureKind::Cancelled, "stop").retryable);
        assert!(JobFailure::new(FailureKind::Interrupted, "restart").retryable);
    }

    #[test]
    fn test_source_ref_builders() {
        let source = SourceRef::new("inv.pdf", "INV-1")
            .with_auction_id("A-3")
            .with_metadata("auctions.csv");
        assert_eq!(source.auction_id.as_deref(), Some("A-3"));
        assert_eq!(source.metadata_path, Some(PathBuf::from("auctions.csv")));
    }

    #[test]
    fn test_status_report_collects_warnings() {
        let mut job = ImportJob::new(SourceRef::new("a.pdf", "A"), JobOptions::default());
        job.result = Some(JobResult {
            warnings: vec!["page 2 has no text layer".to_string()],
            ..Default::default()
        });
        let report = job.status_report();
        assert_eq!(report.warnings, vec!["page 2 has no text layer"]);
        assert_eq!(report.status, JobStatus::Pending);
    }
}
