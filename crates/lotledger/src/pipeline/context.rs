use crate::extractor::{DocumentKind, Extraction};
use crate::normalizer::{
    CandidateItem, ClassifiedItem, MetadataTable, NormalizationContext, NormalizationError,
};
use crate::worker::job::{ImportJob, JobResult};

use super::error::PipelineWarning;

pub struct PipelineContext {
    // Input
    pub job: ImportJob,
    pub bytes: Vec<u8>,
    pub kind: DocumentKind,
    pub metadata: Option<MetadataTable>,

    // Step 1 result
    pub extraction: Option<Extraction>,

    // Step 2 result, set before any record is normalized
    pub normalization: Option<NormalizationContext>,

    // Step 3 results, in source order
    pub candidates: Vec<CandidateItem>,
    pub record_errors: Vec<NormalizationError>,

    // Step 4 result
    pub items: Vec<ClassifiedItem>,

    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: ImportJob, bytes: Vec<u8>, kind: DocumentKind) -> Self {
        Self {
            job,
            bytes,
            kind,
            metadata: None,
            extraction: None,
            normalization: None,
            candidates: Vec::new(),
            record_errors: Vec::new(),
            items: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataTable) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Whatever the pipeline got through, as a job result.
    pub fn to_result(&self) -> JobResult {
        JobResult {
            item_count: self.items.len(),
            items: self.items.clone(),
            record_errors: self.record_errors.clone(),
            warnings: self.warnings.iter().map(|w| w.to_string()).collect(),
            low_confidence_pages: self
                .extraction
                .as_ref()
                .map(|e| e.low_confidence_pages.clone())
                .unwrap_or_default(),
            dry_run: self.job.options.dry_run,
            ..Default::default()
        }
    }
}
