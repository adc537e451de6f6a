pub mod broadcast;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod orchestrator;
pub mod pipeline;
pub mod storage;
mod sync;
pub mod worker;

pub use broadcast::{JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use classifier::{Category, Classification, Classifier, Condition};
pub use config::{load_config, Config};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, ExtractionError, JobError, LedgerError, Result, WorkerError};
pub use extractor::{DocumentKind, ExtractorRegistry};
pub use normalizer::{CandidateItem, ClassifiedItem, NormalizationError, RateDefaults};
pub use orchestrator::{Orchestrator, RecoveryReport, Stores};
pub use pipeline::Pipeline;
pub use storage::{
    CommitReceipt, JobRepository, PersistenceError, PersistenceGateway, SeedStateStore,
};
pub use worker::{
    FailureKind, ImportJob, InvoiceScanner, JobOptions, JobStatus, JobStatusReport, Priority,
    SourceRef, WorkerPool,
};
