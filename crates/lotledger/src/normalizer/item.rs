use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::classifier::{Category, Classification, Condition};

/// A line item with typed values, before classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub quantity: u32,
    pub bid_amount: Option<Decimal>,
    pub buyers_premium: Option<Decimal>,
    pub sales_tax: Option<Decimal>,
    pub shipping: Option<Decimal>,
    pub buyers_premium_percent: Decimal,
    pub sales_tax_percent: Decimal,
    pub invoice_id: String,
    pub auction_id: Option<String>,
    pub page: u32,
    pub line_position: u32,
    pub lot_number: Option<String>,
    pub invoice_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// A candidate item with its category and condition attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    #[serde(flatten)]
    pub item: CandidateItem,
    pub category: Category,
    pub condition: Condition,
    pub confidence: f64,
    #[serde(default)]
    pub matched_rules: Vec<String>,
}

impl ClassifiedItem {
    pub fn new(item: CandidateItem, classification: Classification) -> Self {
        Self {
            item,
            category: classification.category,
            condition: classification.condition,
            confidence: classification.confidence,
            matched_rules: classification.matched_rules,
        }
    }
}
