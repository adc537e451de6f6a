use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::extractor::{Extraction, SemanticField};
use crate::normalizer::dates::parse_date;

/// Configured rates used when metadata does not supply one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateDefaults {
    #[serde(default = "default_buyers_premium")]
    pub buyers_premium_percent: Decimal,
    #[serde(default = "default_sales_tax")]
    pub sales_tax_percent: Decimal,
}

fn default_buyers_premium() -> Decimal {
    Decimal::new(20, 0)
}

fn default_sales_tax() -> Decimal {
    Decimal::new(8, 0)
}

impl Default for RateDefaults {
    fn default() -> Self {
        Self {
            buyers_premium_percent: default_buyers_premium(),
            sales_tax_percent: default_sales_tax(),
        }
    }
}

/// Where a resolved rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    Metadata,
    Default,
}

/// One invoice's row from an auction metadata spreadsheet. Fields that were
/// blank or unparseable are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuctionMetadata {
    pub invoice_id: String,
    pub auction_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub buyers_premium_percent: Option<Decimal>,
    pub sales_tax_percent: Option<Decimal>,
}

/// A metadata cell or row that could not be used. Warnings without an
/// invoice id concern the sheet as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataWarning {
    pub invoice_id: Option<String>,
    pub message: String,
}

impl MetadataWarning {
    fn sheet(message: String) -> Self {
        Self {
            invoice_id: None,
            message,
        }
    }

    fn invoice(invoice_id: &str, message: String) -> Self {
        Self {
            invoice_id: Some(invoice_id.to_string()),
            message,
        }
    }
}

impl fmt::Display for MetadataWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Metadata rows keyed by invoice id, plus warnings about cells that could
/// not be used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataTable {
    rows: BTreeMap<String, AuctionMetadata>,
    pub warnings: Vec<MetadataWarning>,
}

impl MetadataTable {
    pub fn from_extraction(extraction: &Extraction) -> Self {
        let mut table = MetadataTable::default();

        for record in &extraction.records {
            let Some(invoice_id) = record.field(SemanticField::InvoiceId.as_str()) else {
                table.warnings.push(MetadataWarning::sheet(format!(
                    "metadata row {} has no invoice id; skipped",
                    record.position.line + 1
                )));
                continue;
            };
            let invoice_id = invoice_id.trim().to_string();
            if table.rows.contains_key(&invoice_id) {
                table.warnings.push(MetadataWarning::invoice(
                    &invoice_id,
                    format!(
                        "duplicate metadata row for invoice '{}'; keeping the first",
                        invoice_id
                    ),
                ));
                continue;
            }

            let mut row = AuctionMetadata {
                invoice_id: invoice_id.clone(),
                auction_id: record
                    .field(SemanticField::AuctionId.as_str())
                    .map(|s| s.trim().to_string()),
                ..Default::default()
            };

            if let Some(raw) = record.field(SemanticField::Date.as_str()) {
                row.date = parse_date(raw);
                if row.date.is_none() {
                    table.warnings.push(MetadataWarning::invoice(
                        &invoice_id,
                        format!("invoice '{}': unrecognised date '{}'", invoice_id, raw),
                    ));
                }
            }

            for (field, slot) in [
                (
                    SemanticField::BuyersPremiumPercent,
                    &mut row.buyers_premium_percent,
                ),
                (SemanticField::SalesTaxPercent, &mut row.sales_tax_percent),
            ] {
                if let Some(raw) = record.field(field.as_str()) {
                    match parse_percent(raw) {
                        Ok(value) => *slot = Some(value),
                        Err(reason) => table.warnings.push(MetadataWarning::invoice(
                            &invoice_id,
                            format!(
                                "invoice '{}': {} '{}' ignored ({})",
                                invoice_id, field, raw, reason
                            ),
                        )),
                    }
                }
            }

            table.rows.insert(invoice_id, row);
        }

        table
    }

    pub fn get(&self, invoice_id: &str) -> Option<&AuctionMetadata> {
        self.rows.get(invoice_id.trim())
    }

    /// Warnings about `invoice_id`'s row plus those about the whole sheet.
    pub fn warnings_for<'a>(
        &'a self,
        invoice_id: &'a str,
    ) -> impl Iterator<Item = &'a MetadataWarning> + 'a {
        let invoice_id = invoice_id.trim();
        self.warnings
            .iter()
            .filter(move |w| w.invoice_id.as_deref().map_or(true, |id| id == invoice_id))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Parses `18`, `18%`, `6.5 %` into a percentage within `[0, 100]`.
pub fn parse_percent(raw: &str) -> Result<Decimal, String> {
    let trimmed = raw.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    let value =
        Decimal::from_str(number).map_err(|_| format!("'{}' is not a percentage", raw.trim()))?;
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(format!("{} is outside 0-100", value));
    }
    Ok(value)
}

/// Invoice-level values every record of one document is normalized against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizationContext {
    pub invoice_id: String,
    pub auction_id: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    pub buyers_premium_percent: Decimal,
    pub sales_tax_percent: Decimal,
    pub premium_source: RateSource,
    pub tax_source: RateSource,
}

impl NormalizationContext {
    /// Resolves each rate on its own: the metadata value when present,
    /// otherwise the configured default. A declared auction id wins over the
    /// spreadsheet's.
    pub fn resolve(
        invoice_id: &str,
        declared_auction_id: Option<&str>,
        metadata: Option<&AuctionMetadata>,
        defaults: &RateDefaults,
    ) -> Self {
        let premium = metadata.and_then(|m| m.buyers_premium_percent);
        let tax = metadata.and_then(|m| m.sales_tax_percent);

        Self {
            invoice_id: invoice_id.to_string(),
            auction_id: declared_auction_id
                .map(|s| s.to_string())
                .or_else(|| metadata.and_then(|m| m.auction_id.clone())),
            invoice_date: metadata.and_then(|m| m.date),
            buyers_premium_percent: premium.unwrap_or(defaults.buyers_premium_percent),
            sales_tax_percent: tax.unwrap_or(defaults.sales_tax_percent),
            premium_source: if premium.is_some() {
                RateSource::Metadata
            } else {
                RateSource::Default
            },
            tax_source: if tax.is_some() {
                RateSource::Metadata
            } else {
                RateSource::Default
            },
        }
    }
}
