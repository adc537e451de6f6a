use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::WorkerError;
use crate::extractor::DocumentKind;
use crate::worker::job::SourceRef;

/// Finds invoice PDFs for a seed run. The invoice id is the file stem.
pub struct InvoiceScanner {
    input_directory: PathBuf,
    metadata: Option<PathBuf>,
}

impl InvoiceScanner {
    pub fn new<P: AsRef<Path>>(input_directory: P) -> Self {
        Self {
            input_directory: input_directory.as_ref().to_path_buf(),
            metadata: None,
        }
    }

    /// Auction metadata sheet attached to every source found.
    pub fn with_metadata<P: AsRef<Path>>(mut self, metadata: P) -> Self {
        self.metadata = Some(metadata.as_ref().to_path_buf());
        self
    }

    pub fn input_directory(&self) -> &Path {
        &self.input_directory
    }

    /// Top-level PDFs, sorted by path.
    pub fn scan(&self) -> Result<Vec<SourceRef>, WorkerError> {
        let mut sources = Vec::new();

        for entry in WalkDir::new(&self.input_directory)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|source| WorkerError::ScanFailed {
                path: self.input_directory.clone(),
                source,
            })?;
            let path = entry.path();

            if !entry.file_type().is_file() {
                continue;
            }

            let is_pdf = path
                .extension()
                .and_then(|e| e.to_str())
                .and_then(DocumentKind::from_extension)
                == Some(DocumentKind::Pdf);
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            if is_pdf {
                debug!("Found invoice: {}", path.display());
                let mut source = SourceRef::new(path, stem);
                if let Some(metadata) = &self.metadata {
                    source = source.with_metadata(metadata);
                }
                sources.push(source);
            }
        }

        info!(
            "Scanned {} invoices in {}",
            sources.len(),
            self.input_directory.display()
        );
        Ok(sources)
    }
}
