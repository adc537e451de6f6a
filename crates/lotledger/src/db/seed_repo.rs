//! `seed_state` table.

use rusqlite::{params, OptionalExtension};

use crate::error::JobError;
use crate::storage::{SeedRecord, SeedStateStore};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};

#[derive(Clone)]
pub struct SqliteSeedState {
    db: Database,
}

impl SqliteSeedState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SeedStateStore for SqliteSeedState {
    fn lookup(&self, fingerprint: &str) -> Result<Option<SeedRecord>, JobError> {
        let row: Option<(String, String, String)> = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT job_id, result, recorded_at FROM seed_state WHERE fingerprint = ?1",
                    params![fingerprint],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                )
                .optional()?)
        })?;

        let Some((job_id, result, recorded_at)) = row else {
            return Ok(None);
        };

        let result: crate::worker::job::JobResult =
            serde_json::from_str(&result).map_err(|source| DatabaseError::Serialization {
                column: "result",
                source,
            })?;

        Ok(Some(SeedRecord {
            job_id,
            item_count: result.item_count,
            result,
            recorded_at: parse_timestamp("recorded_at", &recorded_at)?,
        }))
    }

    fn record(&self, fingerprint: &str, record: SeedRecord) -> Result<(), JobError> {
        let result =
            serde_json::to_string(&record.result).map_err(|source| DatabaseError::Serialization {
                column: "result",
                source,
            })?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO seed_state (fingerprint, job_id, item_count, result, recorded_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(fingerprint) DO UPDATE SET
                    job_id = excluded.job_id,
                    item_count = excluded.item_count,
                    result = excluded.result,
                    recorded_at = excluded.recorded_at",
                params![
                    fingerprint,
                    record.job_id,
                    record.item_count as i64,
                    result,
                    format_timestamp(record.recorded_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }
}
