//! Import job lifecycle: enqueue, claim, process, commit-or-fail, retry,
//! cancel and start-up recovery.
//!
//! ```text
//! pending ──claim──▶ processing ──▶ completed
//!    ▲                   │
//!    └──retry── failed ◀─┤
//!                        └──▶ dead   (attempts > max_attempts)
//! ```

pub mod fingerprint;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::{Database, SqliteItemGateway, SqliteJobRepository, SqliteSeedState};
use crate::error::{ExtractionError, JobError, Result};
use crate::extractor::DocumentKind;
use crate::normalizer::MetadataTable;
use crate::pipeline::{
    BroadcastProgress, Pipeline, PipelineContext, PipelineError, ProgressEvent, ProgressReporter,
};
use crate::storage::{
    ClaimOutcome, JobRepository, MemoryGateway, MemoryJobRepository, MemorySeedState,
    PersistenceGateway, SeedRecord, SeedStateStore,
};
use crate::sync;
use crate::worker::job::{
    FailureKind, ImportJob, JobFailure, JobOptions, JobResult, JobStatus, JobStatusReport,
    SourceRef,
};
use crate::worker::queue::{JobQueue, MemoryQueue};

pub use fingerprint::{fingerprint, FingerprintLock, FingerprintLocks};

/// The stores an orchestrator runs against.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobRepository>,
    pub seed: Arc<dyn SeedStateStore>,
    pub gateway: Arc<dyn PersistenceGateway>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobRepository::new()),
            seed: Arc::new(MemorySeedState::new()),
            gateway: Arc::new(MemoryGateway::new()),
        }
    }

    pub fn sqlite(db: &Database) -> Self {
        Self {
            jobs: Arc::new(SqliteJobRepository::new(db.clone())),
            seed: Arc::new(SqliteSeedState::new(db.clone())),
            gateway: Arc::new(SqliteItemGateway::new(db.clone())),
        }
    }
}

/// What [`Orchestrator::recover`] did with the jobs it found.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryReport {
    /// Jobs that were processing and are now failed.
    pub interrupted: Vec<String>,
    /// Jobs that were processing and ran out of attempts.
    pub dead: Vec<String>,
    pub requeued: Vec<String>,
}

/// A failed attempt, with whatever the pipeline got through.
struct AttemptFailure {
    failure: JobFailure,
    partial: Option<JobResult>,
}

impl AttemptFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            failure: JobFailure::new(kind, message),
            partial: None,
        }
    }
}

impl From<JobError> for AttemptFailure {
    fn from(err: JobError) -> Self {
        Self::new(FailureKind::PersistenceFailure, err.to_string())
    }
}

pub struct Orchestrator {
    stores: Stores,
    queue: Arc<dyn JobQueue>,
    pipeline: Pipeline,
    broadcaster: JobProgressBroadcaster,
    max_attempts: u32,
    locks: FingerprintLocks,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl Orchestrator {
    pub fn new(config: &Config, stores: Stores) -> Self {
        Self {
            stores,
            queue: Arc::new(MemoryQueue::new()),
            pipeline: Pipeline::from_config(config),
            broadcaster: JobProgressBroadcaster::default(),
            max_attempts: config.max_attempts,
            locks: FingerprintLocks::new(),
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    pub fn broadcaster(&self) -> &JobProgressBroadcaster {
        &self.broadcaster
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Next queued job id, waiting up to `timeout`.
    pub fn next_job(&self, timeout: Duration) -> Option<String> {
        self.queue.pop(timeout)
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Records a new pending job and queues it.
    pub fn enqueue(&self, source: SourceRef, options: JobOptions) -> Result<String> {
        let job = ImportJob::new(source, options);
        self.stores.jobs.insert(&job)?;
        self.queue.push(&job.id, job.options.priority);
        self.broadcaster.start_job(&job.id, &job.source.filename());

        info!(
            "Enqueued job {} for {} (invoice {}, priority {})",
            job.id,
            job.source.path.display(),
            job.source.invoice_id,
            job.options.priority
        );
        Ok(job.id)
    }

    /// Exclusive `pending → processing` transition.
    pub fn claim(&self, job_id: &str) -> Result<ClaimOutcome> {
        let outcome = self.stores.jobs.try_claim(job_id)?;
        match &outcome {
            ClaimOutcome::Claimed(job) => {
                self.arm_cancel_flag(&job.id);
                debug!("Claimed job {} (attempt {})", job.id, job.attempts)
            }
            ClaimOutcome::AlreadyProcessing(job) => {
                debug!("Job {} is already being processed", job.id)
            }
            ClaimOutcome::NotClaimable(job) => {
                debug!("Job {} is {} and cannot be claimed", job.id, job.status)
            }
        }
        Ok(outcome)
    }

    /// Claims and processes a job. A job that cannot be claimed is left
    /// untouched and its current status is returned.
    pub fn run_job(&self, job_id: &str) -> Result<JobStatusReport> {
        match self.claim(job_id)? {
            ClaimOutcome::Claimed(job) => self.process(job),
            ClaimOutcome::AlreadyProcessing(job) | ClaimOutcome::NotClaimable(job) => {
                Ok(job.status_report())
            }
        }
    }

    /// Runs a claimed job to `completed`, `failed` or `dead`.
    pub fn process(&self, mut job: ImportJob) -> Result<JobStatusReport> {
        let cancel = self.cancel_flag(&job.id);
        let progress =
            BroadcastProgress::new(self.broadcaster.tracker(&job.id, &job.source.filename()));

        let outcome = self.attempt(&mut job, &progress, &cancel);
        self.clear_cancel_flag(&job.id);

        match outcome {
            Ok(result) => self.complete(job, result, &progress),
            Err(failed) => self.fail(job, failed, &progress),
        }
    }

    fn attempt(
        &self,
        job: &mut ImportJob,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> std::result::Result<JobResult, AttemptFailure> {
        let path = job.source.path.clone();
        let bytes = std::fs::read(&path).map_err(|e| {
            AttemptFailure::new(
                FailureKind::SourceUnreadable,
                format!("Failed to read '{}': {}", path.display(), e),
            )
        })?;

        let key = fingerprint(&bytes, &job.source.invoice_id);
        job.idempotency_key = Some(key.clone());

        let kind = DocumentKind::detect(&path).map_err(|e| AttemptFailure {
            failure: JobFailure::from_extraction(&e),
            partial: None,
        })?;
        if kind != DocumentKind::Pdf {
            return Err(AttemptFailure::new(
                FailureKind::UnsupportedFormat,
                format!(
                    "'{}' is a spreadsheet; pass it as auction metadata",
                    path.display()
                ),
            ));
        }

        // Jobs over identical content run one at a time
        let lock = self.locks.get(&key);
        let _guard = lock.lock();

        let options = job.options;
        if !options.force && !options.dry_run {
            if let Some(prior) = self.stores.seed.lookup(&key)? {
                info!(
                    "Job {}: document already ingested by job {}",
                    job.id, prior.job_id
                );
                let mut result = prior.result;
                result.duplicate_of = Some(prior.job_id);
                return Ok(result);
            }
        }

        let metadata = match &job.source.metadata_path {
            Some(metadata_path) => Some(self.load_metadata(metadata_path)?),
            None => None,
        };

        let mut ctx = PipelineContext::new(job.clone(), bytes, kind);
        if let Some(metadata) = metadata {
            ctx = ctx.with_metadata(metadata);
        }

        if let Err(e) = self.pipeline.run(&mut ctx, progress, cancel) {
            let failure = match e {
                PipelineError::Extraction(e) => JobFailure::from_extraction(&e),
                PipelineError::Cancelled { processed } => JobFailure::new(
                    FailureKind::Cancelled,
                    format!("Cancelled after {} record(s)", processed),
                ),
            };
            return Err(AttemptFailure {
                failure,
                partial: Some(ctx.to_result()),
            });
        }

        let mut result = ctx.to_result();
        if options.dry_run {
            info!("Job {}: dry run, nothing committed", job.id);
            return Ok(result);
        }

        {
            let _step = info_span!("commit", items = result.items.len()).entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Committing,
                message: format!("Committing {} item(s)", result.items.len()),
            });

            match self
                .stores
                .gateway
                .upsert_batch(&job.source.invoice_id, &key, &result.items)
            {
                Ok(receipt) => result.receipt = Some(receipt),
                Err(e) => {
                    result.durable_positions = e.durable_positions().to_vec();
                    return Err(AttemptFailure {
                        failure: JobFailure::from_persistence(&e),
                        partial: Some(result),
                    });
                }
            }
        }

        if let Err(e) = self.stores.seed.record(&key, SeedRecord::new(&job.id, &result)) {
            warn!("Job {}: failed to record seed state: {}", job.id, e);
            result
                .warnings
                .push(format!("seed state not recorded: {}", e));
        }

        Ok(result)
    }

    fn load_metadata(&self, path: &Path) -> std::result::Result<MetadataTable, AttemptFailure> {
        let bytes = std::fs::read(path).map_err(|e| {
            AttemptFailure::new(
                FailureKind::SourceUnreadable,
                format!("Failed to read metadata '{}': {}", path.display(), e),
            )
        })?;
        let kind = DocumentKind::detect(path).map_err(|e| AttemptFailure {
            failure: JobFailure::from_extraction(&e),
            partial: None,
        })?;
        if kind == DocumentKind::Pdf {
            return Err(AttemptFailure::new(
                FailureKind::UnsupportedFormat,
                format!("metadata '{}' must be a spreadsheet", path.display()),
            ));
        }

        match self.pipeline.extractors().extract(&bytes, kind) {
            Ok(extraction) => Ok(MetadataTable::from_extraction(&extraction)),
            Err(ExtractionError::NoExtractableContent { .. }) => Ok(MetadataTable::default()),
            Err(e) => Err(AttemptFailure {
                failure: JobFailure::from_extraction(&e),
                partial: None,
            }),
        }
    }

    fn complete(
        &self,
        mut job: ImportJob,
        result: JobResult,
        progress: &dyn ProgressReporter,
    ) -> Result<JobStatusReport> {
        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.completed_at = Some(now);
        job.updated_at = now;
        job.failure = None;

        info!(
            "Job {} completed: {} item(s), {} record error(s){}",
            job.id,
            result.item_count,
            result.record_errors.len(),
            result
                .duplicate_of
                .as_ref()
                .map(|d| format!(", duplicate of {}", d))
                .unwrap_or_default()
        );
        progress.report(ProgressEvent::Completed {
            item_count: result.item_count,
            duplicate_of: result.duplicate_of.clone(),
        });

        job.result = Some(result);
        self.stores.jobs.update(&job)?;
        Ok(job.status_report())
    }

    fn fail(
        &self,
        mut job: ImportJob,
        failed: AttemptFailure,
        progress: &dyn ProgressReporter,
    ) -> Result<JobStatusReport> {
        let now = Utc::now();
        job.status = self.status_after_failure(job.attempts);
        job.updated_at = now;
        if job.status == JobStatus::Dead {
            job.completed_at = Some(now);
        }

        warn!(
            "Job {} {} on attempt {}/{}: {}",
            job.id, job.status, job.attempts, self.max_attempts, failed.failure.message
        );
        progress.report(ProgressEvent::Failed {
            status: job.status,
            error: failed.failure.message.clone(),
        });

        job.failure = Some(failed.failure);
        job.result = failed.partial;
        self.stores.jobs.update(&job)?;
        Ok(job.status_report())
    }

    fn status_after_failure(&self, attempts: u32) -> JobStatus {
        if attempts > self.max_attempts {
            JobStatus::Dead
        } else {
            JobStatus::Failed
        }
    }

    /// Moves a failed job back to pending and queues it again.
    pub fn retry(&self, job_id: &str) -> Result<()> {
        let mut job = self.load(job_id)?;
        if job.status != JobStatus::Failed {
            return Err(invalid_transition(&job, JobStatus::Pending).into());
        }

        job.status = JobStatus::Pending;
        job.updated_at = Utc::now();
        if !self.stores.jobs.update_if(&job, JobStatus::Failed)? {
            let current = self.load(job_id)?;
            return Err(invalid_transition(&current, JobStatus::Pending).into());
        }

        self.clear_cancel_flag(&job.id);
        self.queue.push(&job.id, job.options.priority);
        info!("Job {} queued for retry (attempt {} next)", job.id, job.attempts + 1);
        Ok(())
    }

    /// Cancels a job. Pending jobs fail immediately; processing jobs stop
    /// after the record in hand. Returns the status right after the call.
    pub fn cancel(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.load(job_id)?;
        match job.status {
            JobStatus::Pending => {
                let mut cancelled = job.clone();
                cancelled.status = JobStatus::Failed;
                cancelled.updated_at = Utc::now();
                cancelled.failure = Some(JobFailure::new(
                    FailureKind::Cancelled,
                    "Cancelled before processing",
                ));

                if self.stores.jobs.update_if(&cancelled, JobStatus::Pending)? {
                    info!("Job {} cancelled while pending", job_id);
                    self.broadcaster.send(JobProgressEvent::failed(
                        job_id,
                        &job.source.filename(),
                        JobStatus::Failed,
                        "Cancelled before processing",
                    ));
                    return Ok(JobStatus::Failed);
                }

                // Claimed in the meantime
                self.cancel(job_id)
            }
            JobStatus::Processing => {
                match self.running_cancel_flag(job_id) {
                    Some(flag) => {
                        flag.store(true, Ordering::SeqCst);
                        info!("Job {} will stop after its current record", job_id);
                    }
                    None => warn!(
                        "Job {} is processing but not running in this process; nothing to cancel",
                        job_id
                    ),
                }
                Ok(JobStatus::Processing)
            }
            _ => Err(invalid_transition(&job, JobStatus::Failed).into()),
        }
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobStatusReport> {
        Ok(self.load(job_id)?.status_report())
    }

    /// Start-up pass: jobs left processing by a previous run are failed as
    /// interrupted, pending jobs are queued again.
    pub fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for mut job in self.stores.jobs.list_by_status(JobStatus::Processing)? {
            job.status = self.status_after_failure(job.attempts);
            job.updated_at = Utc::now();
            job.failure = Some(JobFailure::new(
                FailureKind::Interrupted,
                "Process stopped while the job was processing",
            ));
            if job.status == JobStatus::Dead {
                job.completed_at = Some(job.updated_at);
            }

            if self.stores.jobs.update_if(&job, JobStatus::Processing)? {
                self.clear_cancel_flag(&job.id);
                warn!("Job {} was interrupted; marked {}", job.id, job.status);
                match job.status {
                    JobStatus::Dead => report.dead.push(job.id),
                    _ => report.interrupted.push(job.id),
                }
            }
        }

        let mut pending = self.stores.jobs.list_by_status(JobStatus::Pending)?;
        pending.sort_by(|a, b| {
            b.options
                .priority
                .cmp(&a.options.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        for job in pending {
            self.queue.push(&job.id, job.options.priority);
            report.requeued.push(job.id);
        }

        info!(
            "Recovery: {} interrupted, {} dead, {} requeued",
            report.interrupted.len(),
            report.dead.len(),
            report.requeued.len()
        );
        Ok(report)
    }

    fn load(&self, job_id: &str) -> Result<ImportJob> {
        self.stores
            .jobs
            .get(job_id)?
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()).into())
    }

    /// Arms a fresh flag for the attempt that was just claimed.
    fn arm_cancel_flag(&self, job_id: &str) {
        sync::lock(&self.cancel_flags, "cancel flags")
            .insert(job_id.to_string(), Arc::new(AtomicBool::new(false)));
    }

    fn cancel_flag(&self, job_id: &str) -> Arc<AtomicBool> {
        let mut flags = sync::lock(&self.cancel_flags, "cancel flags");
        Arc::clone(flags.entry(job_id.to_string()).or_default())
    }

    fn running_cancel_flag(&self, job_id: &str) -> Option<Arc<AtomicBool>> {
        sync::lock(&self.cancel_flags, "cancel flags")
            .get(job_id)
            .map(Arc::clone)
    }

    fn clear_cancel_flag(&self, job_id: &str) {
        sync::lock(&self.cancel_flags, "cancel flags").remove(job_id);
    }
}

fn invalid_transition(job: &ImportJob, to: JobStatus) -> JobError {
    JobError::InvalidTransition {
        job_id: job.id.clone(),
        from: job.status.to_string(),
        to: to.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::pdf::test_support::build_pdf;
    use crate::storage::PersistenceError;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        orchestrator: Orchestrator,
        gateway: Arc<MemoryGateway>,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        let gateway = Arc::new(MemoryGateway::new());
        let stores = Stores {
            jobs: Arc::new(MemoryJobRepository::new()),
            seed: Arc::new(MemorySeedState::new()),
            gateway: gateway.clone(),
        };
        let config = Config {
            max_attempts,
            ..Config::default()
        };
        Fixture {
            dir: tempfile::tempdir().unwrap(),
            orchestrator: Orchestrator::new(&config, stores),
            gateway,
        }
    }

    impl Fixture {
        fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, bytes).unwrap();
            path
        }

        fn invoice(&self, name: &str) -> PathBuf {
            self.write(
                name,
                &build_pdf(&[vec![
                    (72.0, 700.0, "Victorian Teapot — $150.00"),
                    (72.0, 680.0, "Glass Vase — $45.00"),
                ]]),
            )
        }
    }

    #[test]
    fn test_enqueue_then_run() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        assert_eq!(f.orchestrator.queued(), 1);
        assert_eq!(f.orchestrator.get_status(&id).unwrap().status, JobStatus::Pending);

        let next = f.orchestrator.next_job(Duration::ZERO).unwrap();
        let report = f.orchestrator.run_job(&next).unwrap();

        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.result.unwrap().item_count, 2);
        assert_eq!(f.gateway.item_count(), 2);
        assert!(f.orchestrator.locks.is_empty());
    }

    #[test]
    fn test_duplicate_submission_short_circuits() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let first = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        f.orchestrator.run_job(&first).unwrap();

        let second = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        let report = f.orchestrator.run_job(&second).unwrap();

        let result = report.result.unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(result.duplicate_of, Some(first));
        assert_eq!(result.item_count, 2);
        assert_eq!(f.gateway.commit_count(), 1);
    }

    #[test]
    fn test_force_reprocesses_without_duplicates() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let first = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        f.orchestrator.run_job(&first).unwrap();

        let forced = f
            .orchestrator
            .enqueue(
                SourceRef::new(&path, "INV-1"),
                JobOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let report = f.orchestrator.run_job(&forced).unwrap();

        let result = report.result.unwrap();
        assert!(result.duplicate_of.is_none());
        assert_eq!(result.receipt.unwrap().updated, 2);
        assert_eq!(f.gateway.item_count(), 2);
    }

    #[test]
    fn test_dry_run_commits_nothing() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let dry = f
            .orchestrator
            .enqueue(
                SourceRef::new(&path, "INV-1"),
                JobOptions {
                    dry_run: true,
                    ..Default::default()
                },
            )
            .unwrap();
        let report = f.orchestrator.run_job(&dry).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert!(report.result.unwrap().dry_run);
        assert_eq!(f.gateway.commit_count(), 0);

        // Seed state untouched, so a real run still processes the document
        let real = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        let report = f.orchestrator.run_job(&real).unwrap();
        assert!(report.result.unwrap().duplicate_of.is_none());
        assert_eq!(f.gateway.item_count(), 2);
    }

    #[test]
    fn test_corrupt_document_fails_without_retry_benefit() {
        let f = fixture(3);
        let path = f.write("broken.pdf", b"definitely not a pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        let report = f.orchestrator.run_job(&id).unwrap();

        assert_eq!(report.status, JobStatus::Failed);
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::CorruptDocument);
        assert!(!failure.retryable);
    }

    #[test]
    fn test_missing_source_is_retryable() {
        let f = fixture(3);
        let id = f
            .orchestrator
            .enqueue(
                SourceRef::new(f.dir.path().join("gone.pdf"), "INV-1"),
                JobOptions::default(),
            )
            .unwrap();
        let report = f.orchestrator.run_job(&id).unwrap();
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::SourceUnreadable);
        assert!(failure.retryable);
    }

    #[test]
    fn test_spreadsheet_source_is_rejected() {
        let f = fixture(3);
        let path = f.write("auctions.csv", b"invoice_id\nINV-1\n");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.failure.unwrap().kind, FailureKind::UnsupportedFormat);
    }

    #[test]
    fn test_persistence_failure_then_retry() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        f.gateway.fail_next(PersistenceError::Partial {
            durable_positions: vec![0],
            message: "disk full".to_string(),
        });
        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, FailureKind::PersistenceFailure);
        assert_eq!(report.result.unwrap().durable_positions, vec![0]);

        f.orchestrator.retry(&id).unwrap();
        assert_eq!(f.orchestrator.get_status(&id).unwrap().status, JobStatus::Pending);

        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.attempts, 2);
        assert_eq!(f.gateway.item_count(), 2);
    }

    #[test]
    fn test_fourth_failure_is_dead() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        for attempt in 1..=4u32 {
            f.gateway
                .fail_next(PersistenceError::Unavailable("locked".to_string()));
            let report = f.orchestrator.run_job(&id).unwrap();
            assert_eq!(report.attempts, attempt);
            if attempt < 4 {
                assert_eq!(report.status, JobStatus::Failed);
                f.orchestrator.retry(&id).unwrap();
            } else {
                assert_eq!(report.status, JobStatus::Dead);
            }
        }

        assert!(matches!(
            f.orchestrator.retry(&id),
            Err(crate::error::LedgerError::Job(JobError::InvalidTransition { .. }))
        ));
    }

    #[test]
    fn test_cancel_pending_is_immediate() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        assert_eq!(f.orchestrator.cancel(&id).unwrap(), JobStatus::Failed);
        let report = f.orchestrator.get_status(&id).unwrap();
        assert_eq!(report.failure.unwrap().kind, FailureKind::Cancelled);
        assert_eq!(report.attempts, 0);

        // The queued id is skipped by the worker
        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(f.gateway.commit_count(), 0);
    }

    #[test]
    fn test_cancel_processing_stops_after_current_record() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        let job = match f.orchestrator.claim(&id).unwrap() {
            ClaimOutcome::Claimed(job) => job,
            other => panic!("Expected Claimed, got {:?}", other),
        };
        assert_eq!(f.orchestrator.cancel(&id).unwrap(), JobStatus::Processing);

        let report = f.orchestrator.process(job).unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        assert_eq!(report.failure.unwrap().kind, FailureKind::Cancelled);
        assert_eq!(f.gateway.commit_count(), 0);
    }

    #[test]
    fn test_cancel_does_not_leak_into_a_later_attempt() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        f.orchestrator.claim(&id).unwrap();
        assert_eq!(f.orchestrator.cancel(&id).unwrap(), JobStatus::Processing);
        while f.orchestrator.next_job(Duration::ZERO).is_some() {}

        // The process died before the attempt ran
        let recovered = f.orchestrator.recover().unwrap();
        assert_eq!(recovered.interrupted, vec![id.clone()]);

        f.orchestrator.retry(&id).unwrap();
        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(f.gateway.item_count(), 2);
    }

    #[test]
    fn test_cancel_unknown_processing_job_sets_no_flag() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        f.orchestrator.claim(&id).unwrap();
        f.orchestrator.clear_cancel_flag(&id);

        assert_eq!(f.orchestrator.cancel(&id).unwrap(), JobStatus::Processing);
        assert!(f.orchestrator.running_cancel_flag(&id).is_none());
    }

    #[test]
    fn test_second_claim_is_a_no_op() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let id = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();

        assert!(matches!(
            f.orchestrator.claim(&id).unwrap(),
            ClaimOutcome::Claimed(_)
        ));
        let report = f.orchestrator.run_job(&id).unwrap();
        assert_eq!(report.status, JobStatus::Processing);
        assert_eq!(report.attempts, 1);
    }

    #[test]
    fn test_recover_fails_interrupted_and_requeues_pending() {
        let f = fixture(3);
        let path = f.invoice("inv-1.pdf");
        let stuck = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-1"), JobOptions::default())
            .unwrap();
        let waiting = f
            .orchestrator
            .enqueue(SourceRef::new(&path, "INV-2"), JobOptions::default())
            .unwrap();
        f.orchestrator.claim(&stuck).unwrap();
        while f.orchestrator.next_job(Duration::ZERO).is_some() {}

        let report = f.orchestrator.recover().unwrap();
        assert_eq!(report.interrupted, vec![stuck.clone()]);
        assert_eq!(report.requeued, vec![waiting.clone()]);

        let status = f.orchestrator.get_status(&stuck).unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.failure.unwrap().kind, FailureKind::Interrupted);
        assert_eq!(f.orchestrator.next_job(Duration::ZERO), Some(waiting));
    }

    #[test]
    fn test_unknown_job() {
        let f = fixture(3);
        assert!(matches!(
            f.orchestrator.get_status("nope"),
            Err(crate::error::LedgerError::Job(JobError::UnknownJob(_)))
        ));
    }
}
