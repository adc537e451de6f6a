//! Turns raw line records into typed candidate items.
//!
//! Each record is normalized on its own; a malformed record yields a
//! [`NormalizationError`] carrying its position and never stops the batch.

pub mod context;
pub mod dates;
pub mod item;
pub mod money;
pub mod quantity;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extractor::RawLineRecord;

pub use context::{
    AuctionMetadata, MetadataTable, MetadataWarning, NormalizationContext, RateDefaults,
    RateSource,
};
pub use dates::parse_date;
pub use item::{CandidateItem, ClassifiedItem};
pub use money::{parse_money, MoneyError};
pub use quantity::{find_quantity, QuantityMatch};

/// Money columns in the order they appear at the end of a row.
const AMOUNT_FIELDS: [&str; 4] = ["bid_amount", "buyers_premium", "sales_tax", "shipping"];

static RE_LOT_INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:lot#?|#)(\d+[a-z]?):?$").unwrap());
static RE_LOT_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^lot[:#.]?$").unwrap());
static RE_LOT_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#?(\d+[a-z]?)[:.]?$").unwrap());

fn is_separator(token: &str) -> bool {
    matches!(token, "-" | "—" | "–" | "|" | ":" | "/")
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("page {page}, line {line}: {kind}")]
pub struct NormalizationError {
    pub page: u32,
    pub line: u32,
    pub kind: NormalizationErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NormalizationErrorKind {
    #[error("invalid {field} '{raw}': {reason}")]
    InvalidAmount {
        field: String,
        raw: String,
        reason: MoneyError,
    },

    #[error("no amount found")]
    MissingAmount,

    #[error("no item name found")]
    MissingName,

    #[error("more than {} trailing amounts", AMOUNT_FIELDS.len())]
    TooManyAmounts,
}

impl NormalizationError {
    fn at(record: &RawLineRecord, kind: NormalizationErrorKind) -> Self {
        Self {
            page: record.position.page,
            line: record.position.line,
            kind,
        }
    }
}

/// Normalizes one item row against the invoice's context.
pub fn normalize(
    record: &RawLineRecord,
    context: &NormalizationContext,
) -> Result<CandidateItem, NormalizationError> {
    let mut warnings = Vec::new();
    let tokens = attach_currency_markers(&record.tokens);
    let mut used = vec![false; tokens.len()];

    let lot_number = take_lot_number(&tokens, &mut used);

    let quantity = find_quantity(&tokens);
    for idx in &quantity.consumed {
        used[*idx] = true;
    }
    if let Some(warning) = quantity.warning {
        warnings.push(warning);
    }

    let remaining: Vec<usize> = (0..tokens.len()).filter(|i| !used[*i]).collect();
    let amount_run = trailing_amount_run(&tokens, &remaining);
    if amount_run.is_empty() {
        return Err(NormalizationError::at(
            record,
            NormalizationErrorKind::MissingAmount,
        ));
    }
    if amount_run.len() > AMOUNT_FIELDS.len() {
        return Err(NormalizationError::at(
            record,
            NormalizationErrorKind::TooManyAmounts,
        ));
    }

    let mut amounts = [None; 4];
    for (slot, idx) in amount_run.iter().enumerate() {
        let raw = &tokens[*idx];
        let value = parse_money(raw).map_err(|reason| {
            NormalizationError::at(
                record,
                NormalizationErrorKind::InvalidAmount {
                    field: AMOUNT_FIELDS[slot].to_string(),
                    raw: raw.clone(),
                    reason,
                },
            )
        })?;
        amounts[slot] = Some(value);
    }

    let descriptive: Vec<&str> = remaining
        .iter()
        .filter(|i| !amount_run.contains(*i))
        .map(|i| tokens[*i].as_str())
        .collect();
    let (name, description) = split_name(&descriptive);
    let Some(name) = name else {
        return Err(NormalizationError::at(
            record,
            NormalizationErrorKind::MissingName,
        ));
    };

    let [bid_amount, buyers_premium, sales_tax, shipping] = amounts;
    Ok(CandidateItem {
        name,
        description,
        quantity: quantity.value,
        bid_amount,
        buyers_premium,
        sales_tax,
        shipping,
        buyers_premium_percent: context.buyers_premium_percent,
        sales_tax_percent: context.sales_tax_percent,
        invoice_id: context.invoice_id.clone(),
        auction_id: context.auction_id.clone(),
        page: record.position.page,
        line_position: record.position.line,
        lot_number,
        invoice_date: context.invoice_date,
        warnings,
    })
}

/// `Lot 12`, `Lot: 12`, `Lot#12`, `#12` at the start of the row.
fn take_lot_number(tokens: &[String], used: &mut [bool]) -> Option<String> {
    let first = tokens.first()?;

    if let Some(caps) = RE_LOT_INLINE.captures(first) {
        used[0] = true;
        return Some(caps[1].to_string());
    }

    if RE_LOT_LABEL.is_match(first) {
        let caps = RE_LOT_VALUE.captures(tokens.get(1)?)?;
        used[0] = true;
        used[1] = true;
        return Some(caps[1].to_string());
    }

    None
}

/// Joins a currency marker printed apart from its amount (`40.00 USD`,
/// `$ 45.00`) onto that amount.
fn attach_currency_markers(tokens: &[String]) -> Vec<String> {
    let mut joined: Vec<String> = Vec::with_capacity(tokens.len());
    let mut iter = tokens.iter().peekable();

    while let Some(token) = iter.next() {
        if money::is_currency_marker(token) {
            if let Some(amount) = joined
                .last_mut()
                .filter(|prev| {
                    let prev = prev.as_str();
                    money::looks_like_amount(prev) && !money::has_currency_marker(prev)
                })
            {
                amount.push(' ');
                amount.push_str(token);
                continue;
            }
            if let Some(amount) = iter.next_if(|next| money::looks_like_amount(next.as_str())) {
                joined.push(format!("{} {}", token, amount));
                continue;
            }
        }
        joined.push(token.clone());
    }
    joined
}

/// Indices of the amount-shaped tokens that end the row. When any of them
/// carries a currency marker, leading bare numbers (years, model numbers) are
/// left to the name. Malformed amounts stay in the run so parsing reports them.
fn trailing_amount_run(tokens: &[String], remaining: &[usize]) -> Vec<usize> {
    let mut run: Vec<usize> = remaining
        .iter()
        .rev()
        .take_while(|i| money::looks_like_amount(&tokens[**i]))
        .copied()
        .collect();
    run.reverse();

    if run.iter().any(|i| money::looks_like_money(&tokens[*i])) {
        let first_money = run
            .iter()
            .position(|i| money::looks_like_money(&tokens[*i]))
            .unwrap_or(0);
        run.drain(..first_money);
    }
    run
}

/// First phrase is the name; later phrases after separators form the
/// description.
fn split_name(tokens: &[&str]) -> (Option<String>, Option<String>) {
    let mut phrases: Vec<Vec<&str>> = vec![Vec::new()];
    for token in tokens {
        if is_separator(token) {
            phrases.push(Vec::new());
            continue;
        }
        if let Some(current) = phrases.last_mut() {
            current.push(*token);
        }
    }

    let mut phrases = phrases
        .into_iter()
        .filter(|p| !p.is_empty())
        .map(|p| p.join(" ").trim_end_matches(':').trim().to_string())
        .filter(|p| !p.is_empty());

    let name = phrases.next();
    let rest: Vec<String> = phrases.collect();
    let description = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" - "))
    };
    (name, description)
}
