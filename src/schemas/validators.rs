//! Free-standing field validators shared across raw-equity construction
//! and feed-payload normalisation.
//!
//! Grounded in the original source's `schemas/validators.py`, in
//! particular the US/EU thousands-separator disambiguation in
//! `_convert_separators`.

use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

fn non_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w]+").unwrap())
}

fn plain_numeric_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(?:\.\d+)?$").unwrap())
}

/// Collapses punctuation/whitespace runs to single spaces and upper-cases,
/// matching `validate_name`'s `[^\w]+` substitution.
pub fn normalise_name(raw: &str) -> String {
    let collapsed = non_word_re().replace_all(raw, " ");
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

#[derive(Debug, Error)]
pub enum NumericNormaliseError {
    #[error("numeric value {0:?} is negative")]
    Negative(String),
    #[error("{0:?} does not look like a number")]
    NotNumeric(String),
}

/// Normalises a price/market-cap string in either US (`1,234.56`) or EU
/// (`1.234,56`) convention into a `Decimal`, or `None` for an empty field.
pub fn normalise_numeric(raw: &str) -> Result<Option<Decimal>, NumericNormaliseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    if let Some(rest) = trimmed.strip_prefix('-') {
        return Err(NumericNormaliseError::Negative(rest.to_string()));
    }
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let converted = convert_separators(trimmed);

    if !plain_numeric_re().is_match(&converted) {
        return Err(NumericNormaliseError::NotNumeric(raw.to_string()));
    }

    converted
        .parse::<Decimal>()
        .map(Some)
        .map_err(|_| NumericNormaliseError::NotNumeric(raw.to_string()))
}

/// Disambiguates US (`,` thousands, `.` decimal) from EU (`.` thousands,
/// `,` decimal) separator conventions.
fn convert_separators(text: &str) -> String {
    let last_comma = text.rfind(',');
    let last_dot = text.rfind('.');

    match (last_comma, last_dot) {
        (Some(comma), Some(dot)) if comma < dot => {
            // US style: "1,234.56" -> strip thousands commas.
            text.replace(',', "")
        }
        (Some(comma), Some(dot)) if comma > dot => {
            // EU style: "1.234,56" -> strip thousands dots, comma becomes decimal.
            text.replace('.', "").replacen(',', ".", 1)
        }
        (Some(_), None) => {
            // Single comma and no dot: treat as decimal separator.
            text.replacen(',', ".", 1)
        }
        _ => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_us_style_thousands() {
        let value = normalise_numeric("1,234.56").unwrap().unwrap();
        assert_eq!(value, Decimal::new(123456, 2));
    }

    #[test]
    fn normalises_eu_style_thousands() {
        let value = normalise_numeric("1.234,56").unwrap().unwrap();
        assert_eq!(value, Decimal::new(123456, 2));
    }

    #[test]
    fn single_comma_is_decimal_point() {
        let value = normalise_numeric("12,5").unwrap().unwrap();
        assert_eq!(value, Decimal::new(125, 1));
    }

    #[test]
    fn empty_string_is_none() {
        assert_eq!(normalise_numeric("").unwrap(), None);
    }

    #[test]
    fn rejects_negative() {
        assert!(normalise_numeric("-5.00").is_err());
    }

    #[test]
    fn rejects_scientific_notation() {
        assert!(normalise_numeric("1.5e10").is_err());
    }

    #[test]
    fn strips_leading_plus() {
        let value = normalise_numeric("+42.50").unwrap().unwrap();
        assert_eq!(value, Decimal::new(4250, 2));
    }

    #[test]
    fn name_collapses_punctuation_and_upcases() {
        assert_eq!(normalise_name("Acme, Inc.  "), "ACME INC");
    }
}
