use std::fmt;

use thiserror::Error;

use crate::error::ExtractionError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{0}")]
    Extraction(#[from] ExtractionError),

    #[error("Cancelled after {processed} record(s)")]
    Cancelled { processed: usize },
}

/// Non-fatal findings carried into the job result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    NoExtractableContent,
    LowConfidencePage { page: u32 },
    MissingMetadataRow { invoice_id: String },
    Metadata(String),
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoExtractableContent => write!(f, "document has no extractable line items"),
            Self::LowConfidencePage { page } => {
                write!(f, "page {} has no text layer (low confidence)", page)
            }
            Self::MissingMetadataRow { invoice_id } => write!(
                f,
                "no metadata row for invoice {}; using default rates",
                invoice_id
            ),
            Self::Metadata(message) => write!(f, "metadata: {}", message),
        }
    }
}
