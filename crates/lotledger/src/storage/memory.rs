//! In-process stores, used by tests and by runs without a database.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::Utc;

use crate::error::JobError;
use crate::normalizer::ClassifiedItem;
use crate::sync;
use crate::worker::job::{ImportJob, JobStatus};

use super::{
    ClaimOutcome, CommitReceipt, JobRepository, PersistenceError, PersistenceGateway, SeedRecord,
    SeedStateStore,
};

#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<String, ImportJob>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        sync::read(&self.jobs, "job repository").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobRepository for MemoryJobRepository {
    fn insert(&self, job: &ImportJob) -> Result<(), JobError> {
        let mut jobs = sync::write(&self.jobs, "job repository");
        if jobs.contains_key(&job.id) {
            return Err(JobError::Store(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<ImportJob>, JobError> {
        Ok(sync::read(&self.jobs, "job repository").get(job_id).cloned())
    }

    fn update(&self, job: &ImportJob) -> Result<(), JobError> {
        let mut jobs = sync::write(&self.jobs, "job repository");
        match jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(JobError::UnknownJob(job.id.clone())),
        }
    }

    fn update_if(&self, job: &ImportJob, expected: JobStatus) -> Result<bool, JobError> {
        let mut jobs = sync::write(&self.jobs, "job repository");
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| JobError::UnknownJob(job.id.clone()))?;
        if stored.status != expected {
            return Ok(false);
        }
        *stored = job.clone();
        Ok(true)
    }

    fn try_claim(&self, job_id: &str) -> Result<ClaimOutcome, JobError> {
        let mut jobs = sync::write(&self.jobs, "job repository");
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?;

        Ok(match job.status {
            JobStatus::Pending => {
                let now = Utc::now();
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.started_at = Some(now);
                job.updated_at = now;
                job.failure = None;
                ClaimOutcome::Claimed(job.clone())
            }
            JobStatus::Processing => ClaimOutcome::AlreadyProcessing(job.clone()),
            _ => ClaimOutcome::NotClaimable(job.clone()),
        })
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ImportJob>, JobError> {
        let jobs = sync::read(&self.jobs, "job repository");
        let mut matching: Vec<ImportJob> =
            jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(matching)
    }
}

#[derive(Default)]
pub struct MemorySeedState {
    records: RwLock<HashMap<String, SeedRecord>>,
}

impl MemorySeedState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeedStateStore for MemorySeedState {
    fn lookup(&self, fingerprint: &str) -> Result<Option<SeedRecord>, JobError> {
        Ok(sync::read(&self.records, "seed state")
            .get(fingerprint)
            .cloned())
    }

    fn record(&self, fingerprint: &str, record: SeedRecord) -> Result<(), JobError> {
        sync::write(&self.records, "seed state").insert(fingerprint.to_string(), record);
        Ok(())
    }
}

/// Item store keyed on `(invoice_id, line_position)`.
///
/// Failures queued with [`MemoryGateway::fail_next`] are returned by the
/// following commits in order. A queued `Partial` failure persists exactly
/// the positions it names before returning.
#[derive(Default)]
pub struct MemoryGateway {
    items: Mutex<BTreeMap<(String, u32), ClassifiedItem>>,
    failures: Mutex<VecDeque<PersistenceError>>,
    commits: AtomicUsize,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, error: PersistenceError) {
        sync::lock(&self.failures, "gateway failures").push_back(error);
    }

    /// Stored items in key order.
    pub fn items(&self) -> Vec<ClassifiedItem> {
        sync::lock(&self.items, "gateway items")
            .values()
            .cloned()
            .collect()
    }

    pub fn item_count(&self) -> usize {
        sync::lock(&self.items, "gateway items").len()
    }

    /// Number of `upsert_batch` calls that reached the store, failed or not.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl PersistenceGateway for MemoryGateway {
    fn upsert_batch(
        &self,
        invoice_id: &str,
        idempotency_key: &str,
        items: &[ClassifiedItem],
    ) -> Result<CommitReceipt, PersistenceError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let injected = sync::lock(&self.failures, "gateway failures").pop_front();

        let mut store = sync::lock(&self.items, "gateway items");
        let mut receipt = CommitReceipt::default();

        let durable: Option<&[u32]> = match &injected {
            None => None,
            Some(PersistenceError::Partial {
                durable_positions, ..
            }) => Some(durable_positions),
            Some(other) => return Err(other.clone()),
        };

        for item in items {
            if let Some(positions) = durable {
                if !positions.contains(&item.item.line_position) {
                    continue;
                }
            }
            let key = (invoice_id.to_string(), item.item.line_position);
            match store.insert(key, item.clone()) {
                Some(_) => receipt.updated += 1,
                None => receipt.inserted += 1,
            }
        }

        if let Some(error) = injected {
            return Err(error);
        }

        let stale: Vec<(String, u32)> = store
            .keys()
            .filter(|(invoice, position)| {
                invoice == invoice_id && !items.iter().any(|i| i.item.line_position == *position)
            })
            .cloned()
            .collect();
        for key in stale {
            store.remove(&key);
            receipt.removed += 1;
        }

        log::debug!(
            "Committed {} item(s) for invoice {} (key {})",
            items.len(),
            invoice_id,
            idempotency_key
        );
        Ok(receipt)
    }
}
