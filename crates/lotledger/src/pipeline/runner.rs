use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info_span, warn};

use crate::broadcast::job_progress::JobPhase;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::error::ExtractionError;
use crate::extractor::{Extraction, ExtractorRegistry};
use crate::normalizer::{normalize, ClassifiedItem, NormalizationContext, RateDefaults};

use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};
use super::progress::{ProgressEvent, ProgressReporter};

/// extract → resolve context → normalize → classify, for one document.
///
/// Committing the result is left to the caller.
pub struct Pipeline {
    extractors: ExtractorRegistry,
    classifier: Classifier,
    defaults: RateDefaults,
}

impl Pipeline {
    pub fn from_config(config: &Config) -> Self {
        Self {
            extractors: ExtractorRegistry::new(),
            classifier: Classifier::new(config.classifier.effective_rules()),
            defaults: config.defaults.clone(),
        }
    }

    pub fn new(extractors: ExtractorRegistry, classifier: Classifier, defaults: RateDefaults) -> Self {
        Self {
            extractors,
            classifier,
            defaults,
        }
    }

    pub fn extractors(&self) -> &ExtractorRegistry {
        &self.extractors
    }

    /// Runs every step. On error the context keeps whatever the earlier
    /// steps and records produced. `cancel` is checked after each record.
    pub fn run(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
        cancel: &AtomicBool,
    ) -> Result<(), PipelineError> {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.id,
            invoice_id = %ctx.job.source.invoice_id,
            filename = %ctx.job.source.filename(),
        )
        .entered();

        // Step 1: Extract raw line records
        {
            let _step = info_span!("extract").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Extracting,
                message: format!("Extracting {}", ctx.job.source.filename()),
            });
            self.step_extract(ctx)?;
        }

        // Step 2: Resolve invoice-level context
        self.step_resolve_context(ctx);

        // Step 3: Normalize records
        {
            let _step = info_span!("normalize").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Normalizing,
                message: format!("Normalizing {} record(s)", record_count(ctx)),
            });
            self.step_normalize(ctx, cancel)?;
        }

        // Step 4: Classify
        {
            let _step = info_span!("classify").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Classifying,
                message: format!("Classifying {} item(s)", ctx.candidates.len()),
            });
            self.step_classify(ctx, cancel)?;
        }

        debug!(
            items = ctx.items.len(),
            record_errors = ctx.record_errors.len(),
            "Pipeline finished"
        );
        Ok(())
    }

    fn step_extract(&self, ctx: &mut PipelineContext) -> Result<(), PipelineError> {
        let extraction = match self.extractors.extract(&ctx.bytes, ctx.kind) {
            Ok(extraction) => extraction,
            Err(ExtractionError::NoExtractableContent {
                low_confidence_pages,
            }) => {
                warn!("No extractable line items in {}", ctx.job.source.filename());
                ctx.warnings.push(PipelineWarning::NoExtractableContent);
                Extraction {
                    records: Vec::new(),
                    low_confidence_pages,
                }
            }
            Err(e) => return Err(e.into()),
        };

        for page in &extraction.low_confidence_pages {
            ctx.warnings
                .push(PipelineWarning::LowConfidencePage { page: *page });
        }
        debug!(records = extraction.records.len(), "Extracted records");

        ctx.extraction = Some(extraction);
        Ok(())
    }

    fn step_resolve_context(&self, ctx: &mut PipelineContext) {
        let invoice_id = ctx.job.source.invoice_id.clone();
        let metadata_row = match &ctx.metadata {
            Some(table) => {
                for warning in table.warnings_for(&invoice_id) {
                    ctx.warnings.push(PipelineWarning::Metadata(warning.to_string()));
                }
                let row = table.get(&invoice_id);
                if row.is_none() {
                    ctx.warnings.push(PipelineWarning::MissingMetadataRow {
                        invoice_id: invoice_id.clone(),
                    });
                }
                row
            }
            None => None,
        };

        ctx.normalization = Some(NormalizationContext::resolve(
            &invoice_id,
            ctx.job.source.auction_id.as_deref(),
            metadata_row,
            &self.defaults,
        ));
    }

    fn step_normalize(
        &self,
        ctx: &mut PipelineContext,
        cancel: &AtomicBool,
    ) -> Result<(), PipelineError> {
        let (Some(extraction), Some(context)) = (&ctx.extraction, &ctx.normalization) else {
            return Ok(());
        };

        for (processed, record) in extraction.records.iter().enumerate() {
            match normalize(record, context) {
                Ok(item) => ctx.candidates.push(item),
                Err(e) => {
                    debug!("Record rejected: {}", e);
                    ctx.record_errors.push(e);
                }
            }

            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Cancelled {
                    processed: processed + 1,
                });
            }
        }
        Ok(())
    }

    fn step_classify(
        &self,
        ctx: &mut PipelineContext,
        cancel: &AtomicBool,
    ) -> Result<(), PipelineError> {
        for (processed, candidate) in ctx.candidates.iter().enumerate() {
            let classification = self
                .classifier
                .classify(&candidate.name, candidate.description.as_deref());
            ctx.items
                .push(ClassifiedItem::new(candidate.clone(), classification));

            if cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Cancelled {
                    processed: processed + 1,
                });
            }
        }
        Ok(())
    }
}

fn record_count(ctx: &PipelineContext) -> usize {
    ctx.extraction.as_ref().map_or(0, |e| e.records.len())
}
