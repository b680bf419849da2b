//! Price-text parsing for store-formatted currency strings.

use crate::error::{Error, Result};

/// Parse a formatted price string (e.g. "$12.34", "2,499.99 $", "0.89") into
/// integer cents. Fails on strings with no digits rather than guessing zero.
pub fn parse_price_cents(text: &str) -> Result<i64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if cleaned.is_empty() {
        return Err(Error::Other(format!("unparseable price text: {text:?}")));
    }

    let (dollars, cents) = match cleaned.split_once('.') {
        Some((d, c)) => (d, c),
        None => (cleaned.as_str(), ""),
    };

    let dollars: i64 = if dollars.is_empty() {
        0
    } else {
        dollars
            .parse()
            .map_err(|_| Error::Other(format!("unparseable price text: {text:?}")))?
    };

    // Normalize the fractional part to exactly two digits.
    let mut frac = cents.to_string();
    frac.truncate(2);
    while frac.len() < 2 {
        frac.push('0');
    }
    let cents: i64 = frac
        .parse()
        .map_err(|_| Error::Other(format!("unparseable price text: {text:?}")))?;

    Ok(dollars * 100 + cents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_dollar_price() {
        assert_eq!(parse_price_cents("$12.34").unwrap(), 1234);
        assert_eq!(parse_price_cents("$0.89").unwrap(), 89);
    }

    #[test]
    fn test_parse_price_with_thousand_separator() {
        assert_eq!(parse_price_cents("2,499.99 $").unwrap(), 249999);
    }

    #[test]
    fn test_parse_whole_dollar_price() {
        assert_eq!(parse_price_cents("5").unwrap(), 500);
        assert_eq!(parse_price_cents("$7").unwrap(), 700);
    }

    #[test]
    fn test_parse_single_fraction_digit() {
        assert_eq!(parse_price_cents("$1.5").unwrap(), 150);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_price_cents("free").is_err());
        assert!(parse_price_cents("").is_err());
    }
}
