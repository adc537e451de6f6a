//! `import_jobs` table.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::JobError;
use crate::storage::{ClaimOutcome, JobRepository};
use crate::worker::job::{ImportJob, JobOptions, JobStatus, Priority, SourceRef};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// A raw job row, before decoding into an [`ImportJob`].
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    source_path: String,
    invoice_id: String,
    auction_id: Option<String>,
    metadata_path: Option<String>,
    force: bool,
    dry_run: bool,
    priority: String,
    status: String,
    attempts: u32,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
    result: Option<String>,
    failure: Option<String>,
    idempotency_key: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_path: row.get("source_path")?,
            invoice_id: row.get("invoice_id")?,
            auction_id: row.get("auction_id")?,
            metadata_path: row.get("metadata_path")?,
            force: row.get("force")?,
            dry_run: row.get("dry_run")?,
            priority: row.get("priority")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
            result: row.get("result")?,
            failure: row.get("failure")?,
            idempotency_key: row.get("idempotency_key")?,
        })
    }

    fn encode(job: &ImportJob) -> Result<Self, DatabaseError> {
        let result = job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| DatabaseError::Serialization {
                column: "result",
                source,
            })?;
        let failure = job
            .failure
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|source| DatabaseError::Serialization {
                column: "failure",
                source,
            })?;

        Ok(Self {
            id: job.id.clone(),
            source_path: job.source.path.to_string_lossy().to_string(),
            invoice_id: job.source.invoice_id.clone(),
            auction_id: job.source.auction_id.clone(),
            metadata_path: job
                .source
                .metadata_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            force: job.options.force,
            dry_run: job.options.dry_run,
            priority: job.options.priority.as_str().to_string(),
            status: job.status.as_str().to_string(),
            attempts: job.attempts,
            created_at: format_timestamp(job.created_at),
            started_at: job.started_at.map(format_timestamp),
            completed_at: job.completed_at.map(format_timestamp),
            updated_at: format_timestamp(job.updated_at),
            result,
            failure,
            idempotency_key: job.idempotency_key.clone(),
        })
    }

    fn decode(self) -> Result<ImportJob, DatabaseError> {
        let status = JobStatus::from_str(&self.status).map_err(|_| DatabaseError::InvalidValue {
            column: "status",
            value: self.status.clone(),
        })?;
        let priority =
            Priority::from_str(&self.priority).map_err(|_| DatabaseError::InvalidValue {
                column: "priority",
                value: self.priority.clone(),
            })?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| DatabaseError::Serialization {
                column: "result",
                source,
            })?;
        let failure = self
            .failure
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|source| DatabaseError::Serialization {
                column: "failure",
                source,
            })?;

        Ok(ImportJob {
            id: self.id,
            source: SourceRef {
                path: PathBuf::from(self.source_path),
                invoice_id: self.invoice_id,
                auction_id: self.auction_id,
                metadata_path: self.metadata_path.map(PathBuf::from),
            },
            options: JobOptions {
                force: self.force,
                dry_run: self.dry_run,
                priority,
            },
            status,
            attempts: self.attempts,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            started_at: self
                .started_at
                .as_deref()
                .map(|s| parse_timestamp("started_at", s))
                .transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|s| parse_timestamp("completed_at", s))
                .transpose()?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            result,
            failure,
            idempotency_key: self.idempotency_key,
        })
    }
}

fn find_row(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT * FROM import_jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?)
}

/// Overwrites the mutable columns of a job, optionally only while it is in
/// status `expected`. Returns the number of rows changed.
fn update_row(
    conn: &Connection,
    row: &JobRow,
    expected: Option<JobStatus>,
) -> Result<usize, DatabaseError> {
    Ok(conn.execute(
        "UPDATE import_jobs SET priority=?2, status=?3, attempts=?4, started_at=?5,
         completed_at=?6, updated_at=?7, result=?8, failure=?9, idempotency_key=?10,
         force=?11, dry_run=?12
         WHERE id=?1 AND (?13 IS NULL OR status=?13)",
        params![
            row.id,
            row.priority,
            row.status,
            row.attempts,
            row.started_at,
            row.completed_at,
            row.updated_at,
            row.result,
            row.failure,
            row.idempotency_key,
            row.force,
            row.dry_run,
            expected.map(|s| s.as_str()),
        ],
    )?)
}

#[derive(Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobRepository for SqliteJobRepository {
    fn insert(&self, job: &ImportJob) -> Result<(), JobError> {
        let row = JobRow::encode(job)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO import_jobs (id, source_path, invoice_id, auction_id, metadata_path,
                 force, dry_run, priority, status, attempts, created_at, started_at,
                 completed_at, updated_at, result, failure, idempotency_key)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    row.id,
                    row.source_path,
                    row.invoice_id,
                    row.auction_id,
                    row.metadata_path,
                    row.force,
                    row.dry_run,
                    row.priority,
                    row.status,
                    row.attempts,
                    row.created_at,
                    row.started_at,
                    row.completed_at,
                    row.updated_at,
                    row.result,
                    row.failure,
                    row.idempotency_key,
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<ImportJob>, JobError> {
        let row = self.db.with_conn(|conn| find_row(conn, job_id))?;
        Ok(row.map(JobRow::decode).transpose()?)
    }

    fn update(&self, job: &ImportJob) -> Result<(), JobError> {
        let row = JobRow::encode(job)?;
        let changed = self.db.with_conn(|conn| update_row(conn, &row, None))?;

        if changed == 0 {
            return Err(JobError::UnknownJob(job.id.clone()));
        }
        Ok(())
    }

    fn update_if(&self, job: &ImportJob, expected: JobStatus) -> Result<bool, JobError> {
        let row = JobRow::encode(job)?;
        let changed = self
            .db
            .with_conn(|conn| update_row(conn, &row, Some(expected)))?;

        if changed == 0 && self.get(&job.id)?.is_none() {
            return Err(JobError::UnknownJob(job.id.clone()));
        }
        Ok(changed == 1)
    }

    fn try_claim(&self, job_id: &str) -> Result<ClaimOutcome, JobError> {
        let now = format_timestamp(Utc::now());
        let (claimed, row) = self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE import_jobs SET status='processing', attempts=attempts+1,
                 started_at=?2, updated_at=?2, failure=NULL
                 WHERE id=?1 AND status='pending'",
                params![job_id, now],
            )?;
            Ok((changed == 1, find_row(conn, job_id)?))
        })?;

        let job = row
            .ok_or_else(|| JobError::UnknownJob(job_id.to_string()))?
            .decode()?;

        Ok(match (claimed, job.status) {
            (true, _) => ClaimOutcome::Claimed(job),
            (false, JobStatus::Processing) => ClaimOutcome::AlreadyProcessing(job),
            (false, _) => ClaimOutcome::NotClaimable(job),
        })
    }

    fn list_by_status(&self, status: JobStatus) -> Result<Vec<ImportJob>, JobError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM import_jobs WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(params![status.as_str()], JobRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|row| row.decode().map_err(JobError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::item::test_support::classified;
    use crate::worker::job::{FailureKind, JobFailure, JobResult};

    fn repo() -> SqliteJobRepository {
        SqliteJobRepository::new(Database::open_in_memory().unwrap())
    }

    fn job() -> ImportJob {
        ImportJob::new(
            SourceRef::new("/in/inv-1.pdf", "INV-1")
                .with_auction_id("A-1")
                .with_metadata("/in/auctions.xlsx"),
            JobOptions {
                force: true,
                dry_run: false,
                priority: Priority::High,
            },
        )
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let repo = repo();
        let job = job();
        repo.insert(&job).unwrap();

        let loaded = repo.get(&job.id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert!(repo.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_persists_result_and_failure() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).unwrap();

        job.status = JobStatus::Failed;
        job.attempts = 2;
        job.idempotency_key = Some("abc123".to_string());
        job.result = Some(JobResult::from_items(vec![classified("INV-1", 0, "Teapot")]));
        job.failure = Some(JobFailure::new(FailureKind::PersistenceFailure, "locked"));
        job.updated_at = Utc::now();
        repo.update(&job).unwrap();

        assert_eq!(repo.get(&job.id).unwrap().unwrap(), job);
    }

    #[test]
    fn test_update_if_is_conditional() {
        let repo = repo();
        let mut job = job();
        repo.insert(&job).unwrap();

        job.status = JobStatus::Failed;
        assert!(!repo.update_if(&job, JobStatus::Processing).unwrap());
        assert_eq!(repo.get(&job.id).unwrap().unwrap().status, JobStatus::Pending);

        assert!(repo.update_if(&job, JobStatus::Pending).unwrap());
        assert_eq!(repo.get(&job.id).unwrap().unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn test_update_unknown_job() {
        let repo = repo();
        assert!(matches!(repo.update(&job()), Err(JobError::UnknownJob(_))));
    }

    #[test]
    fn test_claim_compare_and_set() {
        let repo = repo();
        let job = job();
        repo.insert(&job).unwrap();

        match repo.try_claim(&job.id).unwrap() {
            ClaimOutcome::Claimed(claimed) => {
                assert_eq!(claimed.status, JobStatus::Processing);
                assert_eq!(claimed.attempts, 1);
                assert!(claimed.started_at.is_some());
            }
            other => panic!("Expected Claimed, got {:?}", other),
        }

        match repo.try_claim(&job.id).unwrap() {
            ClaimOutcome::AlreadyProcessing(current) => assert_eq!(current.attempts, 1),
            other => panic!("Expected AlreadyProcessing, got {:?}", other),
        }

        assert!(matches!(repo.try_claim("missing"), Err(JobError::UnknownJob(_))));
    }

    #[test]
    fn test_list_by_status() {
        let repo = repo();
        let first = job();
        let second = job();
        repo.insert(&first).unwrap();
        repo.insert(&second).unwrap();
        repo.try_claim(&second.id).unwrap();

        let pending = repo.list_by_status(JobStatus::Pending).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first.id);

        let processing = repo.list_by_status(JobStatus::Processing).unwrap();
        assert_eq!(processing.len(), 1);
        assert_eq!(processing[0].id, second.id);
    }
}
