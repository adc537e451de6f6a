use std::path::PathBuf;
use thiserror::Error;

use crate::normalizer::NormalizationError;
use crate::storage::PersistenceError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Normalization error: {0}")]
    Normalization(#[from] NormalizationError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid classification rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },
}

/// Failures while turning document bytes into raw line records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt document: {0}")]
    CorruptDocument(String),

    #[error("No extractable content ({} low-confidence page(s))", low_confidence_pages.len())]
    NoExtractableContent { low_confidence_pages: Vec<u32> },

    #[error("Missing required spreadsheet header(s): {}", missing.join(", "))]
    MissingHeaders { missing: Vec<String> },
}

impl ExtractionError {
    /// Whether the job can still complete (with a warning) after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoExtractableContent { .. })
    }
}

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    #[error("Job {job_id} cannot go from {from} to {to}")]
    InvalidTransition {
        job_id: String,
        from: String,
        to: String,
    },

    #[error("Job store error: {0}")]
    Store(String),

    #[error("Job store error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
