//! Store contracts the orchestrator depends on.
//!
//! Every store is injected; [`memory`] holds in-process implementations and
//! [`crate::db`] the SQLite-backed ones.

pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::JobError;
use crate::normalizer::ClassifiedItem;
use crate::worker::job::{ImportJob, JobResult, JobStatus};

pub use memory::{MemoryGateway, MemoryJobRepository, MemorySeedState};

/// Result of a compare-and-set claim on a job.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The job moved `pending → processing`; carries the updated job.
    Claimed(ImportJob),
    /// Another worker holds the job; nothing changed.
    AlreadyProcessing(ImportJob),
    /// The job is in a state that cannot be claimed.
    NotClaimable(ImportJob),
}

pub trait JobRepository: Send + Sync {
    fn insert(&self, job: &ImportJob) -> Result<(), JobError>;

    fn get(&self, job_id: &str) -> Result<Option<ImportJob>, JobError>;

    /// Replaces the stored job with the same id.
    fn update(&self, job: &ImportJob) -> Result<(), JobError>;

    /// Replaces the stored job only while its status is still `expected`.
    /// Returns whether the write happened.
    fn update_if(&self, job: &ImportJob, expected: JobStatus) -> Result<bool, JobError>;

    /// Atomically moves a pending job to processing, incrementing its attempt
    /// counter and stamping `started_at`.
    fn try_claim(&self, job_id: &str) -> Result<ClaimOutcome, JobError>;

    /// Jobs in `status`, oldest first.
    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ImportJob>, JobError>;
}

/// Last known successful outcome for a fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRecord {
    pub job_id: String,
    pub item_count: usize,
    pub result: JobResult,
    pub recorded_at: DateTime<Utc>,
}

impl SeedRecord {
    pub fn new(job_id: &str, result: &JobResult) -> Self {
        Self {
            job_id: job_id.to_string(),
            item_count: result.item_count,
            result: result.clone(),
            recorded_at: Utc::now(),
        }
    }
}

pub trait SeedStateStore: Send + Sync {
    fn lookup(&self, fingerprint: &str) -> Result<Option<SeedRecord>, JobError>;

    fn record(&self, fingerprint: &str, record: SeedRecord) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub inserted: usize,
    pub updated: usize,
    /// Rows of the invoice whose line position is absent from the batch.
    #[serde(default)]
    pub removed: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Item store unavailable: {0}")]
    Unavailable(String),

    #[error("Partial commit ({} item(s) durable): {message}", durable_positions.len())]
    Partial {
        durable_positions: Vec<u32>,
        message: String,
    },

    #[error("Item store error: {0}")]
    Storage(String),
}

impl PersistenceError {
    pub fn durable_positions(&self) -> &[u32] {
        match self {
            Self::Partial {
                durable_positions, ..
            } => durable_positions,
            _ => &[],
        }
    }
}

/// Upserts classified items keyed on `(invoice_id, line_position)`, so
/// committing the same batch twice leaves a single copy of each item.
/// A successful commit replaces the invoice's item set: stored rows at
/// positions missing from the batch are deleted in the same transaction.
pub trait PersistenceGateway: Send + Sync {
    fn upsert_batch(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
        items: &[ClassifiedItem],
    ) -> Result<CommitReceipt, PersistenceError>;
}
