//! Test harness for isolated job execution.
//!
//! `TestHarness` owns a temp directory for fixture files and an orchestrator
//! wired over in-memory stores, with the item gateway exposed so tests can
//! inspect what was committed or inject failures.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use lotledger::storage::{MemoryGateway, MemoryJobRepository, MemorySeedState};
use lotledger::{Config, JobOptions, JobStatusReport, Orchestrator, SourceRef, Stores};

pub struct TestHarness {
    temp_dir: TempDir,
    pub orchestrator: Arc<Orchestrator>,
    pub gateway: Arc<MemoryGateway>,
    pub jobs: Arc<MemoryJobRepository>,
}

impl TestHarness {
    /// Harness with the default config and a single worker.
    pub fn new() -> Self {
        Self::with_config(Config {
            worker_count: 1,
            ..Config::default()
        })
    }

    pub fn with_config(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let gateway = Arc::new(MemoryGateway::new());
        let jobs = Arc::new(MemoryJobRepository::new());
        let stores = Stores {
            jobs: jobs.clone(),
            seed: Arc::new(MemorySeedState::new()),
            gateway: gateway.clone(),
        };

        Self {
            temp_dir,
            orchestrator: Arc::new(Orchestrator::new(&config, stores)),
            gateway,
            jobs,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a fixture file into the temp directory.
    pub fn write_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, bytes).expect("Failed to write fixture");
        path
    }

    /// Enqueue a job and run it to a final status on the calling thread.
    pub fn ingest(&self, source: SourceRef, options: JobOptions) -> JobStatusReport {
        let job_id = self
            .orchestrator
            .enqueue(source, options)
            .expect("Failed to enqueue");
        self.run_queued(&job_id)
    }

    /// Drain the queue up to `job_id` and return its report.
    pub fn run_queued(&self, job_id: &str) -> JobStatusReport {
        while let Some(next) = self.orchestrator.next_job(Duration::ZERO) {
            let report = self.orchestrator.run_job(&next).expect("Failed to run job");
            if next == job_id {
                return report;
            }
        }
        self.orchestrator
            .get_status(job_id)
            .expect("Failed to read job status")
    }
}
