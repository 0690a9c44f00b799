//! Currency formatting and parsing in the Croatian convention.
//!
//! Amounts are shown with two decimals, a decimal comma and thousands grouped
//! by a space: `1234.5` becomes `1 234,50`.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use thiserror::Error;

pub const DECIMAL_SEPARATOR: char = ',';
pub const GROUP_SEPARATOR: char = ' ';

/// Largest absolute amount accepted from form input.
pub const MAX_INPUT_AMOUNT: i64 = 1_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountParseError {
    #[error("value is empty")]
    Empty,
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("'{0}' is out of range")]
    OutOfRange(String),
}

/// Format an amount as `1 234,50`.
pub fn format_currency(amount: Decimal) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    localize(&format!("{:.2}", rounded))
}

/// Parse a form value such as `2,50`, `2.50` or `1 234,5`.
pub fn parse_amount(text: &str) -> Result<Decimal, AmountParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(AmountParseError::Empty);
    }

    let normalized: String = trimmed
        .chars()
        .filter(|c| *c != GROUP_SEPARATOR && *c != '\u{a0}')
        .map(|c| if c == DECIMAL_SEPARATOR { '.' } else { c })
        .collect();

    let value = Decimal::from_str(&normalized)
        .map_err(|_| AmountParseError::NotANumber(trimmed.to_string()))?;

    if value.abs() > Decimal::from(MAX_INPUT_AMOUNT) {
        return Err(AmountParseError::OutOfRange(trimmed.to_string()));
    }

    Ok(value)
}

/// Turn `-1234.50` into `-1 234,50`.
fn localize(plain: &str) -> String {
    let (sign, unsigned) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain),
    };
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, "00"));

    // "-0,00" is not a useful display value
    let sign = if int_part.chars().chain(frac_part.chars()).all(|c| c == '0') {
        ""
    } else {
        sign
    };

    format!(
        "{}{}{}{}",
        sign,
        group_thousands(int_part),
        DECIMAL_SEPARATOR,
        frac_part
    )
}

fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(GROUP_SEPARATOR);
        }
        out.push(ch);
    }
    out
}
