//! Strict currency parsing into exact decimals.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£'];
const CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP"];

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum MoneyError {
    #[error("empty amount")]
    Empty,

    #[error("negative amounts are not accepted")]
    Negative,

    #[error("unexpected character '{0}'")]
    InvalidCharacter(char),

    #[error("more than one decimal point")]
    MultipleDecimalPoints,

    #[error("malformed digit grouping")]
    MalformedGrouping,

    #[error("no digits after the decimal separator")]
    MissingFraction,
}

/// Parses an amount such as `$1,234.56`, `1.234,56 EUR` or `45,00`.
///
/// The decimal separator is the last of `.`/`,` when both appear. A lone comma
/// followed by exactly three digits is a thousands separator; any other lone
/// comma is a decimal comma. The scale of the input is preserved.
pub fn parse_money(raw: &str) -> Result<Decimal, MoneyError> {
    let body = strip_currency(raw.trim())?;
    if body.is_empty() {
        return Err(MoneyError::Empty);
    }

    if let Some(c) = body
        .chars()
        .find(|c| !c.is_ascii_digit() && *c != ',' && *c != '.')
    {
        return Err(MoneyError::InvalidCharacter(c));
    }
    if !body.chars().any(|c| c.is_ascii_digit()) {
        return Err(MoneyError::Empty);
    }

    let dots = body.matches('.').count();
    let commas = body.matches(',').count();

    let (decimal_sep, group_sep) = match (dots, commas) {
        (0, 0) => (None, None),
        (_, 0) if dots > 1 => return Err(MoneyError::MultipleDecimalPoints),
        (1, 0) => (Some('.'), None),
        (0, 1) => {
            let after = body.len() - body.rfind(',').map_or(0, |i| i + 1);
            if after == 3 {
                (None, Some(','))
            } else {
                (Some(','), None)
            }
        }
        (0, _) => (None, Some(',')),
        _ => {
            let last_dot = body.rfind('.').unwrap_or(0);
            let last_comma = body.rfind(',').unwrap_or(0);
            let (decimal, group, decimal_count) = if last_dot > last_comma {
                ('.', ',', dots)
            } else {
                (',', '.', commas)
            };
            if decimal_count > 1 {
                return Err(MoneyError::MultipleDecimalPoints);
            }
            (Some(decimal), Some(group))
        }
    };

    let (integer, fraction) = match decimal_sep {
        Some(sep) => {
            let idx = body.rfind(sep).ok_or(MoneyError::Empty)?;
            (&body[..idx], Some(&body[idx + 1..]))
        }
        None => (body, None),
    };

    if let Some(fraction) = fraction {
        if fraction.is_empty() {
            return Err(MoneyError::MissingFraction);
        }
        if !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(MoneyError::MalformedGrouping);
        }
    }

    let integer_digits = match group_sep {
        Some(sep) => ungroup(integer, sep)?,
        None => {
            if !integer.chars().all(|c| c.is_ascii_digit()) {
                return Err(MoneyError::MalformedGrouping);
            }
            integer.to_string()
        }
    };

    let integer_digits = if integer_digits.is_empty() {
        "0".to_string()
    } else {
        integer_digits
    };

    let normalized = match fraction {
        Some(fraction) => format!("{}.{}", integer_digits, fraction),
        None => integer_digits,
    };

    Decimal::from_str(&normalized).map_err(|_| MoneyError::MalformedGrouping)
}

/// Removes a single leading or trailing currency symbol/code and rejects
/// negative markers wherever they appear around it.
fn strip_currency(s: &str) -> Result<&str, MoneyError> {
    if s.starts_with('-') || s.ends_with('-') || (s.starts_with('(') && s.ends_with(')')) {
        return Err(MoneyError::Negative);
    }

    let mut body = s;
    for code in CURRENCY_CODES {
        if let Some(rest) = strip_prefix_ignore_case(body, code) {
            body = rest.trim_start();
        } else if let Some(rest) = strip_suffix_ignore_case(body, code) {
            body = rest.trim_end();
        }
    }
    body = body
        .strip_prefix(CURRENCY_SYMBOLS)
        .map(str::trim_start)
        .unwrap_or(body);
    body = body
        .strip_suffix(CURRENCY_SYMBOLS)
        .map(str::trim_end)
        .unwrap_or(body);

    if body.starts_with('-') {
        return Err(MoneyError::Negative);
    }
    Ok(body)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

fn strip_suffix_ignore_case<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    let start = s.len().checked_sub(suffix.len())?;
    let tail = s.get(start..)?;
    tail.eq_ignore_ascii_case(suffix).then(|| &s[..start])
}

/// Validates `1,234,567`-style grouping and returns the bare digits.
fn ungroup(integer: &str, sep: char) -> Result<String, MoneyError> {
    let groups: Vec<&str> = integer.split(sep).collect();
    let Some((first, rest)) = groups.split_first() else {
        return Err(MoneyError::MalformedGrouping);
    };

    let first_ok = (1..=3).contains(&first.len()) && first.chars().all(|c| c.is_ascii_digit());
    let rest_ok = rest
        .iter()
        .all(|g| g.len() == 3 && g.chars().all(|c| c.is_ascii_digit()));
    if !first_ok || !rest_ok {
        return Err(MoneyError::MalformedGrouping);
    }

    Ok(groups.concat())
}

/// True for tokens that start like an amount, well formed or not: `45.00`,
/// `$45.00abc`, `1.234,56€`, `USD 99.99`. Dates, times and phone numbers
/// do not.
pub fn looks_like_amount(token: &str) -> bool {
    let mut body = token.trim();
    for code in CURRENCY_CODES {
        if let Some(rest) = strip_prefix_ignore_case(body, code) {
            body = rest;
        }
    }
    let body =
        body.trim_start_matches(|c: char| CURRENCY_SYMBOLS.contains(&c) || c.is_whitespace());

    body.starts_with(|c: char| c.is_ascii_digit() || c == '.' || c == ',')
        && body.chars().any(|c| c.is_ascii_digit())
        && !body.contains(['/', ':', '-'])
}

/// A currency symbol or code standing on its own, e.g. the `USD` of
/// `40.00 USD`.
pub fn is_currency_marker(token: &str) -> bool {
    let t = token.trim();
    let mut chars = t.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if CURRENCY_SYMBOLS.contains(&c) => true,
        _ => CURRENCY_CODES.iter().any(|code| t.eq_ignore_ascii_case(code)),
    }
}

/// True when a currency symbol or code leads or trails the token.
pub fn has_currency_marker(token: &str) -> bool {
    let t = token.trim();
    t.starts_with(CURRENCY_SYMBOLS)
        || t.ends_with(CURRENCY_SYMBOLS)
        || CURRENCY_CODES.iter().any(|c| {
            strip_prefix_ignore_case(t, c).is_some() || strip_suffix_ignore_case(t, c).is_some()
        })
}

/// True when a token carries an explicit currency marker or a two-digit
/// fraction, as opposed to a bare count or year.
pub fn looks_like_money(token: &str) -> bool {
    let t = token.trim();
    if has_currency_marker(t) {
        return true;
    }
    match t.rfind(['.', ',']) {
        Some(idx) => {
            let tail = &t[idx + 1..];
            tail.len() == 2 && tail.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}
