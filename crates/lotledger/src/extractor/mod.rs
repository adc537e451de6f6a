pub mod pdf;
pub mod spreadsheet;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::normalizer::money::{is_currency_marker, looks_like_amount};

pub use pdf::PdfExtractor;
pub use spreadsheet::{SemanticField, SpreadsheetExtractor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Xlsx,
    Csv,
}

impl DocumentKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(Self::Xlsx),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/pdf" => Some(Self::Pdf),
            "text/csv" => Some(Self::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "application/vnd.ms-excel"
            | "application/vnd.oasis.opendocument.spreadsheet" => Some(Self::Xlsx),
            _ => None,
        }
    }

    /// Picks the kind from the MIME type guessed for `path`, falling back to
    /// the bare extension.
    pub fn detect(path: &Path) -> Result<Self, ExtractionError> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        mime_guess::from_path(path)
            .iter()
            .find_map(|m| Self::from_mime(m.essence_str()))
            .or_else(|| Self::from_extension(extension))
            .ok_or_else(|| ExtractionError::UnsupportedFormat(extension.to_string()))
    }
}

/// Where a record sits in its source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPosition {
    /// 1-based page (PDF) or sheet (spreadsheet) number.
    pub page: u32,
    /// 0-based ordinal of the record across the whole document.
    pub line: u32,
    /// Baseline of the line in PDF user space. `None` for spreadsheet rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
}

/// One logical row of a source document, before any business meaning is
/// attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawLineRecord {
    pub position: RecordPosition,
    /// Whitespace-separated tokens in reading order.
    pub tokens: Vec<String>,
    /// Tokens that look like numbers or money, in reading order.
    pub numeric_candidates: Vec<String>,
    /// Spreadsheet cells keyed by semantic field name. Empty for PDFs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl RawLineRecord {
    pub fn from_tokens(position: RecordPosition, tokens: Vec<String>) -> Self {
        let numeric_candidates = tokens
            .iter()
            .filter(|t| looks_numeric(t))
            .cloned()
            .collect();
        Self {
            position,
            tokens,
            numeric_candidates,
            fields: BTreeMap::new(),
        }
    }

    pub fn text(&self) -> String {
        self.tokens.join(" ")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|s| s.as_str())
            .filter(|s| !s.trim().is_empty())
    }
}

/// Output of a single extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub records: Vec<RawLineRecord>,
    /// Pages that produced no text at all (image-only scans).
    pub low_confidence_pages: Vec<u32>,
}

/// True for tokens such as `150`, `$1,234.56`, `45,00`, `€12.50`, `12,50€`.
pub fn looks_numeric(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| matches!(c, '$' | '€' | '£'));
    let mut saw_digit = false;
    for c in trimmed.chars() {
        match c {
            '0'..='9' => saw_digit = true,
            ',' | '.' => {}
            _ => return false,
        }
    }
    saw_digit
}

/// True when a row ends in something shaped like an amount, optionally
/// followed by a detached currency marker (`40.00 USD`). The amount itself
/// may be malformed; the normalizer reports those.
pub fn ends_with_amount(tokens: &[String]) -> bool {
    match tokens {
        [.., amount, marker] if is_currency_marker(marker) => looks_like_amount(amount),
        [.., last] => looks_like_amount(last),
        [] => false,
    }
}

pub trait DocumentExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError>;
    fn supports(&self, kind: DocumentKind) -> bool;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn DocumentExtractor>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(PdfExtractor::new()),
                Box::new(SpreadsheetExtractor::new(DocumentKind::Xlsx)),
                Box::new(SpreadsheetExtractor::new(DocumentKind::Csv)),
            ],
        }
    }

    pub fn extract(&self, bytes: &[u8], kind: DocumentKind) -> Result<Extraction, ExtractionError> {
        for extractor in &self.extractors {
            if extractor.supports(kind) {
                return extractor.extract(bytes);
            }
        }

        Err(ExtractionError::UnsupportedFormat(format!("{:?}", kind)))
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_extension() {
        assert_eq!(DocumentKind::from_extension("PDF"), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_extension("xlsx"), Some(DocumentKind::Xlsx));
        assert_eq!(DocumentKind::from_extension("ods"), Some(DocumentKind::Xlsx));
        assert_eq!(DocumentKind::from_extension("csv"), Some(DocumentKind::Csv));
        assert_eq!(DocumentKind::from_extension("docx"), None);
    }

    #[test]
    fn test_detect_from_path() {
        assert_eq!(
            DocumentKind::detect(&PathBuf::from("/in/invoice-42.pdf")).unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            DocumentKind::detect(&PathBuf::from("auctions.csv")).unwrap(),
            DocumentKind::Csv
        );
        assert_eq!(
            DocumentKind::detect(&PathBuf::from("auctions.xlsx")).unwrap(),
            DocumentKind::Xlsx
        );
    }

    #[test]
    fn test_detect_unsupported() {
        match DocumentKind::detect(&PathBuf::from("notes.txt")) {
            Err(ExtractionError::UnsupportedFormat(ext)) => assert_eq!(ext, "txt"),
            other => panic!("Expected UnsupportedFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_looks_numeric() {
        assert!(looks_numeric("150"));
        assert!(looks_numeric("$1,234.56"));
        assert!(looks_numeric("€45,00"));
        assert!(looks_numeric("1.2.3"));
        assert!(!looks_numeric("$"));
        assert!(!looks_numeric("12abc"));
        assert!(!looks_numeric("Teapot"));
        assert!(!looks_numeric("—"));
        assert!(looks_numeric("1.234,56€"));
    }

    #[test]
    fn test_ends_with_amount() {
        let row = |s: &str| -> Vec<String> { s.split_whitespace().map(String::from).collect() };
        assert!(ends_with_amount(&row("Oak Chair $80.00")));
        assert!(ends_with_amount(&row("Brass Lamp $45.00abc")));
        assert!(ends_with_amount(&row("Quilt 40.00 USD")));
        assert!(ends_with_amount(&row("Mirror 1.234,56€")));
        assert!(!ends_with_amount(&row("Auction date 03/15/2024")));
        assert!(!ends_with_amount(&row("Payable in USD")));
        assert!(!ends_with_amount(&[]));
    }

    #[test]
    fn test_record_from_tokens_collects_numeric_candidates() {
        let record = RawLineRecord::from_tokens(
            RecordPosition {
                page: 1,
                line: 0,
                y: Some(700.0),
            },
            vec![
                "Lot".to_string(),
                "12".to_string(),
                "Teapot".to_string(),
                "$150.00".to_string(),
            ],
        );
        assert_eq!(record.numeric_candidates, vec!["12", "$150.00"]);
        assert_eq!(record.text(), "Lot 12 Teapot $150.00");
    }

    #[test]
    fn test_registry_rejects_garbage_pdf() {
        let registry = ExtractorRegistry::new();
        let result = registry.extract(b"definitely not a pdf", DocumentKind::Pdf);
        assert!(matches!(result, Err(ExtractionError::CorruptDocument(_))));
    }
}
