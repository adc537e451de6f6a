//! Extraction and normalization over built fixture documents.

mod common;

use std::str::FromStr;

use pretty_assertions::assert_eq;
use rust_decimal::Decimal;

use common::{teapot_invoice, CsvBuilder, PdfBuilder};
use lotledger::extractor::DocumentExtractor;
use lotledger::normalizer::{normalize, MetadataTable, NormalizationContext};
use lotledger::{DocumentKind, ExtractionError, ExtractorRegistry, RateDefaults};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn texts(bytes: &[u8]) -> Vec<String> {
    ExtractorRegistry::new()
        .extract(bytes, DocumentKind::Pdf)
        .unwrap()
        .records
        .iter()
        .map(|r| r.text())
        .collect()
}

#[test]
fn test_two_line_invoice_normalizes_in_order() {
    let extraction = ExtractorRegistry::new()
        .extract(&teapot_invoice(), DocumentKind::Pdf)
        .unwrap();
    let context = NormalizationContext::resolve("INV-1", None, None, &RateDefaults::default());

    let items: Vec<_> = extraction
        .records
        .iter()
        .map(|r| normalize(r, &context).unwrap())
        .collect();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "Victorian Teapot");
    assert_eq!(items[0].bid_amount, Some(dec("150.00")));
    assert_eq!(items[1].name, "Glass Vase");
    assert_eq!(items[1].bid_amount, Some(dec("45.00")));
    assert!(items[0].line_position < items[1].line_position);
}

#[test]
fn test_header_and_totals_are_not_items() {
    let pdf = PdfBuilder::new()
        .lines(&[
            "Spring Estate Auction",
            "Invoice INV-2024-0042",
            "Lot 12 Oak Chair $80.00",
            "Lot 13 Brass Lamp $25.50",
            "Subtotal $105.50",
            "Total $126.60",
        ])
        .build();

    assert_eq!(
        texts(&pdf),
        vec!["Lot 12 Oak Chair $80.00", "Lot 13 Brass Lamp $25.50"]
    );
}

#[test]
fn test_pages_keep_document_order() {
    let pdf = PdfBuilder::new()
        .line("Oak Chair $80.00")
        .page()
        .line("Brass Lamp $25.50")
        .build();

    let extraction = ExtractorRegistry::new()
        .extract(&pdf, DocumentKind::Pdf)
        .unwrap();
    let pages: Vec<u32> = extraction.records.iter().map(|r| r.position.page).collect();
    assert_eq!(pages, vec![1, 2]);
}

#[test]
fn test_scanned_page_is_low_confidence() {
    let pdf = PdfBuilder::new()
        .line("Oak Chair $80.00")
        .page()
        .build();

    let extraction = ExtractorRegistry::new()
        .extract(&pdf, DocumentKind::Pdf)
        .unwrap();
    assert_eq!(extraction.records.len(), 1);
    assert_eq!(extraction.low_confidence_pages, vec![2]);
}

#[test]
fn test_text_without_items_is_not_fatal() {
    let pdf = PdfBuilder::new().line("Thank you for bidding").build();

    match ExtractorRegistry::new().extract(&pdf, DocumentKind::Pdf) {
        Err(e @ ExtractionError::NoExtractableContent { .. }) => assert!(!e.is_fatal()),
        other => panic!("Expected NoExtractableContent, got {:?}", other),
    }
}

#[test]
fn test_corrupt_pdf_is_fatal() {
    match ExtractorRegistry::new().extract(b"not a pdf at all", DocumentKind::Pdf) {
        Err(e @ ExtractionError::CorruptDocument(_)) => assert!(e.is_fatal()),
        other => panic!("Expected CorruptDocument, got {:?}", other),
    }
}

#[test]
fn test_metadata_sheet_with_aliased_headers() {
    let sheet = CsvBuilder::new(&["Invoice #", "Sale", "Buyer's Premium", "Tax Rate"])
        .row(&["INV-1", "A-77", "15%", "6.5"])
        .row(&["INV-2", "A-77", "", ""])
        .build();

    let extraction = ExtractorRegistry::new()
        .extract(&sheet, DocumentKind::Csv)
        .unwrap();
    let table = MetadataTable::from_extraction(&extraction);

    assert_eq!(table.len(), 2);
    let first = table.get("INV-1").unwrap();
    assert_eq!(first.auction_id.as_deref(), Some("A-77"));
    assert_eq!(first.buyers_premium_percent, Some(dec("15")));
    assert_eq!(first.sales_tax_percent, Some(dec("6.5")));

    let second = table.get("INV-2").unwrap();
    assert_eq!(second.buyers_premium_percent, None);
    assert!(table.warnings.is_empty());
}

#[test]
fn test_metadata_sheet_without_invoice_column() {
    let sheet = CsvBuilder::new(&["auction_id", "date"])
        .row(&["A-77", "2024-03-01"])
        .build();

    let result = ExtractorRegistry::new().extract(&sheet, DocumentKind::Csv);
    assert_eq!(
        result.unwrap_err(),
        ExtractionError::MissingHeaders {
            missing: vec!["invoice_id".to_string()]
        }
    );
}

#[test]
fn test_partial_metadata_falls_back_per_field() {
    let sheet = CsvBuilder::metadata()
        .row(&["INV-1", "A-77", "2024-03-01", "12", ""])
        .build();
    let extraction = lotledger::extractor::SpreadsheetExtractor::new(DocumentKind::Csv)
        .extract(&sheet)
        .unwrap();
    let table = MetadataTable::from_extraction(&extraction);

    let context =
        NormalizationContext::resolve("INV-1", None, table.get("INV-1"), &RateDefaults::default());

    assert_eq!(context.buyers_premium_percent, dec("12"));
    assert_eq!(context.sales_tax_percent, RateDefaults::default().sales_tax_percent);
    assert_eq!(context.auction_id.as_deref(), Some("A-77"));
}
