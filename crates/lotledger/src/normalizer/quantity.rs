use std::sync::LazyLock;

use regex::Regex;

static RE_TIMES_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)[xX×]$").unwrap());
static RE_TIMES_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[xX×](\d+)$").unwrap());
static RE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:qty|quantity)[:.]?$").unwrap());
static RE_LABEL_INLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:qty|quantity)[:.]?(\S+)$").unwrap());

/// A quantity found among a row's tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantityMatch {
    pub value: u32,
    /// Indices of the tokens that made up the quantity.
    pub consumed: Vec<usize>,
    pub warning: Option<String>,
}

impl QuantityMatch {
    fn absent() -> Self {
        Self {
            value: 1,
            consumed: Vec::new(),
            warning: None,
        }
    }
}

/// Finds `Qty 2`, `Qty: 2`, `Quantity 2`, `Qty:2`, `2x` or `x2` among
/// `tokens`. Absent quantities default to 1; unparseable or zero values clamp
/// to 1 with a warning.
pub fn find_quantity(tokens: &[String]) -> QuantityMatch {
    for (idx, token) in tokens.iter().enumerate() {
        if RE_LABEL.is_match(token) {
            let Some(raw) = tokens.get(idx + 1) else {
                return QuantityMatch {
                    consumed: vec![idx],
                    warning: Some(format!("'{}' without a value; using 1", token)),
                    ..QuantityMatch::absent()
                };
            };
            return clamp(raw, vec![idx, idx + 1]);
        }

        if let Some(caps) = RE_LABEL_INLINE.captures(token) {
            return clamp(&caps[1], vec![idx]);
        }

        if let Some(caps) = RE_TIMES_SUFFIX
            .captures(token)
            .or_else(|| RE_TIMES_PREFIX.captures(token))
        {
            return clamp(&caps[1], vec![idx]);
        }
    }

    QuantityMatch::absent()
}

fn clamp(raw: &str, consumed: Vec<usize>) -> QuantityMatch {
    match raw.trim().parse::<i64>() {
        Ok(n) if n >= 1 && n <= u32::MAX as i64 => QuantityMatch {
            value: n as u32,
            consumed,
            warning: None,
        },
        Ok(n) => QuantityMatch {
            value: 1,
            consumed,
            warning: Some(format!("quantity {} is out of range; clamped to 1", n)),
        },
        Err(_) => QuantityMatch {
            value: 1,
            consumed,
            warning: Some(format!("unparseable quantity '{}'; clamped to 1", raw)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_quantity_forms() {
        let cases = [
            ("Teapot Qty 2 $150.00", 2, vec![1, 2]),
            ("Teapot Qty: 3 $150.00", 3, vec![1, 2]),
            ("Teapot Quantity 4 $150.00", 4, vec![1, 2]),
            ("Teapot qty:5 $150.00", 5, vec![1]),
            ("Teapot 2x $150.00", 2, vec![1]),
            ("Teapot x6 $150.00", 6, vec![1]),
        ];
        for (line, value, consumed) in cases {
            let found = find_quantity(&tokens(line));
            assert_eq!(found.value, value, "line: {}", line);
            assert_eq!(found.consumed, consumed, "line: {}", line);
            assert_eq!(found.warning, None, "line: {}", line);
        }
    }

    #[test]
    fn test_absent_defaults_to_one() {
        let found = find_quantity(&tokens("Victorian Teapot — $150.00"));
        assert_eq!(found, QuantityMatch::absent());
    }

    #[test]
    fn test_zero_clamps_with_warning() {
        let found = find_quantity(&tokens("Teapot Qty 0 $1.00"));
        assert_eq!(found.value, 1);
        assert!(found.warning.unwrap().contains("clamped to 1"));
    }

    #[test]
    fn test_garbage_clamps_with_warning() {
        let found = find_quantity(&tokens("Teapot Qty: two $1.00"));
        assert_eq!(found.value, 1);
        assert_eq!(found.consumed, vec![1, 2]);
        assert!(found.warning.unwrap().contains("'two'"));
    }

    #[test]
    fn test_words_containing_x_are_not_quantities() {
        let found = find_quantity(&tokens("Onyx Box $10.00"));
        assert!(found.consumed.is_empty());
        assert_eq!(found.value, 1);
    }
}
