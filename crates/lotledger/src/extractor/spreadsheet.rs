use std::collections::BTreeMap;
use std::io::Cursor;

use calamine::Reader;
use serde::{Deserialize, Serialize};

use crate::error::ExtractionError;
use crate::extractor::{DocumentExtractor, DocumentKind, Extraction, RawLineRecord, RecordPosition};

/// Auction metadata columns the extractor knows how to map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticField {
    InvoiceId,
    AuctionId,
    Date,
    BuyersPremiumPercent,
    SalesTaxPercent,
}

impl SemanticField {
    pub const REQUIRED: &'static [SemanticField] = &[SemanticField::InvoiceId];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceId => "invoice_id",
            Self::AuctionId => "auction_id",
            Self::Date => "date",
            Self::BuyersPremiumPercent => "buyers_premium_percent",
            Self::SalesTaxPercent => "sales_tax_percent",
        }
    }

    /// Maps a raw header cell onto a field, accepting common aliases.
    pub fn from_header(header: &str) -> Option<Self> {
        match normalize_header(header).as_str() {
            "invoice_id" | "invoice" | "invoice_no" | "invoice_number" | "inv" | "inv_no" => {
                Some(Self::InvoiceId)
            }
            "auction_id" | "auction" | "auction_no" | "auction_number" | "sale" | "sale_id"
            | "sale_no" => Some(Self::AuctionId),
            "date" | "invoice_date" | "auction_date" | "sale_date" => Some(Self::Date),
            "buyers_premium_percent" | "buyers_premium" | "buyer_premium" | "premium"
            | "premium_percent" | "premium_pct" | "bp" => Some(Self::BuyersPremiumPercent),
            "sales_tax_percent" | "sales_tax" | "sales_tax_rate" | "tax" | "tax_percent"
            | "tax_rate" | "tax_pct" => Some(Self::SalesTaxPercent),
            _ => None,
        }
    }
}

impl std::fmt::Display for SemanticField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cases, drops apostrophes and folds every other run of
/// non-alphanumerics into a single `_`.
fn normalize_header(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    let mut pending_sep = false;
    for c in header.trim().chars() {
        if c == '\'' || c == '\u{2019}' {
            continue;
        }
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Reads the first worksheet of an xlsx/xls/ods workbook, or a CSV file.
pub struct SpreadsheetExtractor {
    kind: DocumentKind,
}

impl SpreadsheetExtractor {
    pub fn new(kind: DocumentKind) -> Self {
        Self { kind }
    }

    fn read_rows(&self, bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractionError> {
        match self.kind {
            DocumentKind::Csv => read_csv_rows(bytes),
            DocumentKind::Xlsx => read_workbook_rows(bytes),
            DocumentKind::Pdf => Err(ExtractionError::UnsupportedFormat("pdf".to_string())),
        }
    }
}

impl DocumentExtractor for SpreadsheetExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let _span =
            tracing::info_span!("extractor.spreadsheet", kind = ?self.kind, bytes = bytes.len())
                .entered();

        let rows = self.read_rows(bytes)?;
        let mut rows = rows.into_iter();

        let Some(header) = rows.next() else {
            return Err(ExtractionError::NoExtractableContent {
                low_confidence_pages: Vec::new(),
            });
        };
        let columns: Vec<Option<SemanticField>> =
            header.iter().map(|h| SemanticField::from_header(h)).collect();

        let missing: Vec<String> = SemanticField::REQUIRED
            .iter()
            .filter(|field| !columns.contains(&Some(**field)))
            .map(|field| field.as_str().to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ExtractionError::MissingHeaders { missing });
        }

        let mut extraction = Extraction::default();
        for row in rows {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let mut fields = BTreeMap::new();
            for (cell, column) in row.iter().zip(&columns) {
                if let Some(field) = column {
                    let value = cell.trim();
                    if !value.is_empty() {
                        // First column wins when two headers alias the same field.
                        fields
                            .entry(field.as_str().to_string())
                            .or_insert_with(|| value.to_string());
                    }
                }
            }

            let tokens = row
                .iter()
                .map(|cell| cell.trim())
                .filter(|cell| !cell.is_empty())
                .map(|cell| cell.to_string())
                .collect();

            let line = extraction.records.len() as u32;
            let mut record = RawLineRecord::from_tokens(
                RecordPosition {
                    page: 1,
                    line,
                    y: None,
                },
                tokens,
            );
            record.fields = fields;
            extraction.records.push(record);
        }

        if extraction.records.is_empty() {
            return Err(ExtractionError::NoExtractableContent {
                low_confidence_pages: Vec::new(),
            });
        }

        log::debug!("Extracted {} spreadsheet rows", extraction.records.len());
        Ok(extraction)
    }

    fn supports(&self, kind: DocumentKind) -> bool {
        kind == self.kind
    }
}

fn read_csv_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result
            .map_err(|e| ExtractionError::CorruptDocument(format!("Failed to read CSV: {}", e)))?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

fn read_workbook_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, ExtractionError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| {
        ExtractionError::CorruptDocument(format!("Failed to open workbook: {}", e))
    })?;

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Ok(Vec::new());
    };

    let range = workbook.worksheet_range(&sheet_name).map_err(|e| {
        ExtractionError::CorruptDocument(format!("Failed to read sheet '{}': {}", sheet_name, e))
    })?;

    Ok(range
        .rows()
        .map(|row| {
            row.iter()
                .map(|cell| match cell {
                    calamine::Data::Empty => String::new(),
                    calamine::Data::String(s) => s.clone(),
                    calamine::Data::Float(f) => f.to_string(),
                    calamine::Data::Int(i) => i.to_string(),
                    calamine::Data::Bool(b) => b.to_string(),
                    // Serial day number; the date normalizer understands it.
                    calamine::Data::DateTime(dt) => dt.as_f64().to_string(),
                    calamine::Data::DateTimeIso(s) => s.clone(),
                    _ => String::new(),
                })
                .collect()
        })
        .collect())
}
