//! Prices are stored as integer minor units (kopecks/cents).
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriceError {
    #[error("price is empty")]
    Empty,
    #[error("price must not be negative")]
    Negative,
    #[error("price has more than two decimal places")]
    TooPrecise,
    #[error("price is out of range")]
    OutOfRange,
    #[error("not a price: {0:?}")]
    Invalid(String),
}

/// Parse a human-entered price such as `1 299,50 ₽`, `1,299.50` or `990`
/// into minor units.
pub fn parse_price(raw: &str) -> Result<i64, PriceError> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(PriceError::Empty);
    }
    let first_digit = compact
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| PriceError::Invalid(raw.to_string()))?;
    if compact[..first_digit].contains('-') {
        return Err(PriceError::Negative);
    }
    let body = compact.trim_matches(|c: char| !c.is_ascii_digit());
    if body.chars().any(|c| !(c.is_ascii_digit() || c == ',' || c == '.')) {
        return Err(PriceError::Invalid(raw.to_string()));
    }

    let normalized = normalize_separators(body).map_err(|e| match e {
        PriceError::Invalid(_) => PriceError::Invalid(raw.to_string()),
        other => other,
    })?;
    let value = Decimal::from_str(&normalized).map_err(|_| PriceError::Invalid(raw.to_string()))?;
    if value.normalize().scale() > 2 {
        return Err(PriceError::TooPrecise);
    }
    value
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or(PriceError::OutOfRange)?
        .trunc()
        .to_i64()
        .ok_or(PriceError::OutOfRange)
}

/// `1,299,000`-style grouping: a 1-3 digit head and 3-digit groups.
fn is_grouped(groups: &[&str]) -> bool {
    match groups {
        [head, tail @ ..] => {
            (1..=3).contains(&head.len()) && !tail.is_empty() && tail.iter().all(|g| g.len() == 3)
        }
        [] => false,
    }
}

/// Rewrite digit groups so the only separator left is a `.` decimal point.
fn normalize_separators(body: &str) -> Result<String, PriceError> {
    let invalid = || PriceError::Invalid(body.to_string());
    let has_comma = body.contains(',');
    let has_dot = body.contains('.');
    match (has_comma, has_dot) {
        (false, false) => Ok(body.to_string()),
        (true, true) => {
            // The right-most separator is the decimal point; the other one
            // may only group thousands to its left.
            let last = body.rfind([',', '.']).ok_or_else(invalid)?;
            let (int_part, frac) = body.split_at(last);
            let decimal = &frac[..1];
            let frac = &frac[1..];
            if int_part.contains(decimal) {
                return Err(invalid());
            }
            let group_sep = if decimal == "," { '.' } else { ',' };
            let groups: Vec<&str> = int_part.split(group_sep).collect();
            if !is_grouped(&groups) {
                return Err(invalid());
            }
            Ok(format!("{}.{frac}", groups.concat()))
        }
        _ => {
            let sep = if has_comma { ',' } else { '.' };
            let groups: Vec<&str> = body.split(sep).collect();
            match groups.as_slice() {
                [int_part, frac] if frac.len() <= 2 => Ok(format!("{int_part}.{frac}")),
                [_, _] => Err(PriceError::TooPrecise),
                _ if is_grouped(&groups) => Ok(groups.concat()),
                _ => Err(invalid()),
            }
        }
    }
}

/// Format minor units for humans: `129950` → `1 299.50 ₽`, `990000` → `9 900 ₽`.
pub fn format_price(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let units = abs / 100;
    let cents = abs % 100;

    let digits = units.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(ch);
    }

    let mut out = format!("{sign}{grouped}");
    if cents != 0 {
        out.push_str(&format!(".{cents:02}"));
    }
    if !currency.is_empty() {
        out.push(' ');
        out.push_str(currency);
    }
    out
}
