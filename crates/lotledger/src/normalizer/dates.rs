use chrono::{Days, NaiveDate};

/// Spreadsheet day serials outside this window are treated as plain numbers.
const SERIAL_RANGE: std::ops::RangeInclusive<u64> = 20_000..=80_000;

const FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y"];

/// Parses invoice dates written as `2024-03-15`, `03/15/2024`, `3/15/24`,
/// `15.03.2024`, `March 15, 2024`, `Mar 15, 2024`, or a spreadsheet day
/// serial such as `45366`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(date) = parse_us_slashed(s) {
        return Some(date);
    }

    for format in FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }

    parse_serial(s)
}

/// `m/d/Y` and `m/d/y`; the year's width decides which.
fn parse_us_slashed(s: &str) -> Option<NaiveDate> {
    let year = s.rsplit('/').next()?;
    if !s.contains('/') {
        return None;
    }
    let format = match year.len() {
        4 => "%m/%d/%Y",
        2 => "%m/%d/%y",
        _ => return None,
    };
    NaiveDate::parse_from_str(s, format).ok()
}

fn parse_serial(s: &str) -> Option<NaiveDate> {
    let days = s.parse::<f64>().ok()?;
    if !days.is_finite() || days < 0.0 {
        return None;
    }
    let whole = days.trunc() as u64;
    if !SERIAL_RANGE.contains(&whole) {
        return None;
    }
    // Serials count from 1899-12-30 once the 1900 leap-year quirk is folded in.
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(whole))
}
