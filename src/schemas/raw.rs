//! The raw equity record: validated but not yet deduplicated, identified,
//! or enriched.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{Currency, Cusip, Figi, Isin, Mic};
use super::validators::{normalise_name, normalise_numeric};

/// A single listing as reported by one source, normalised into the
/// shared field set. Immutable once constructed; the `with_*` helpers
/// return an updated copy, the same way downstream pipeline stages
/// refine a record without mutating the one upstream still holds a
/// reference to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEquity {
    pub name: String,
    pub symbol: String,
    pub isin: Option<Isin>,
    pub cusip: Option<Cusip>,
    pub share_class_figi: Option<Figi>,
    pub mics: Option<Vec<Mic>>,
    pub currency: Option<Currency>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub last_price: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::str_option")]
    pub market_cap: Option<Decimal>,
}

#[derive(Debug, Default, Clone)]
pub struct RawEquityInput<'a> {
    pub name: &'a str,
    pub symbol: &'a str,
    pub isin: Option<&'a str>,
    pub cusip: Option<&'a str>,
    pub share_class_figi: Option<&'a str>,
    pub mics: Vec<String>,
    pub currency: Option<&'a str>,
    pub last_price: Option<&'a str>,
    pub market_cap: Option<&'a str>,
}

impl RawEquity {
    /// Validates and normalises a bag of raw strings into a `RawEquity`.
    /// Name and symbol are required and non-empty after normalisation;
    /// every other field is optional and defaults to `None` on an empty
    /// or absent value.
    pub fn build(input: RawEquityInput<'_>) -> Result<Self, String> {
        let name = normalise_name(input.name);
        if name.is_empty() {
            return Err("name must not be empty".to_string());
        }
        let symbol = input.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err("symbol must not be empty".to_string());
        }

        let isin = optional_parse(input.isin, Isin::parse)?;
        let cusip = optional_parse(input.cusip, Cusip::parse)?;
        let share_class_figi = optional_parse(input.share_class_figi, Figi::parse)?;
        let currency = optional_parse(input.currency, Currency::parse)?;

        let mics = normalise_mics(&input.mics)?;

        let last_price = input
            .last_price
            .map(normalise_numeric)
            .transpose()
            .map_err(|e| e.to_string())?
            .flatten();
        let market_cap = input
            .market_cap
            .map(normalise_numeric)
            .transpose()
            .map_err(|e| e.to_string())?
            .flatten();

        Ok(Self {
            name,
            symbol,
            isin,
            cusip,
            share_class_figi,
            mics,
            currency,
            last_price,
            market_cap,
        })
    }

    /// Returns a copy with `share_class_figi` set, and `name`/`symbol`
    /// filled in only where this record was missing them — the Rust
    /// analogue of `model_copy(update={...})` applied after identifier
    /// resolution.
    pub fn with_identification(&self, figi: Figi, name: Option<&str>, symbol: Option<&str>) -> Self {
        let mut updated = self.clone();
        updated.share_class_figi = Some(figi);
        if let Some(name) = name {
            if !name.is_empty() {
                updated.name = name.to_string();
            }
        }
        if let Some(symbol) = symbol {
            if !symbol.is_empty() {
                updated.symbol = symbol.to_string();
            }
        }
        updated
    }

    /// Returns a copy with any currently-`None` optional field replaced
    /// by the corresponding value from an enrichment result.
    pub fn with_enrichment(&self, other: &RawEquity) -> Self {
        let mut updated = self.clone();
        if updated.isin.is_none() {
            updated.isin = other.isin.clone();
        }
        if updated.cusip.is_none() {
            updated.cusip = other.cusip.clone();
        }
        if updated.mics.is_none() {
            updated.mics = other.mics.clone();
        }
        if updated.currency.is_none() {
            updated.currency = other.currency.clone();
        }
        if updated.last_price.is_none() {
            updated.last_price = other.last_price;
        }
        if updated.market_cap.is_none() {
            updated.market_cap = other.market_cap;
        }
        updated
    }

    pub fn has_missing_fields(&self) -> bool {
        self.isin.is_none()
            || self.cusip.is_none()
            || self.mics.is_none()
            || self.currency.is_none()
            || self.last_price.is_none()
            || self.market_cap.is_none()
    }
}

fn optional_parse<T>(
    value: Option<&str>,
    parser: impl Fn(&str) -> Result<T, String>,
) -> Result<Option<T>, String> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("") => Ok(None),
        Some(v) => parser(v).map(Some),
    }
}

/// Dedupes while preserving first-seen order; every surviving MIC must
/// be exactly four alphanumeric characters. Empty input becomes `None`.
fn normalise_mics(raw: &[String]) -> Result<Option<Vec<Mic>>, String> {
    let mut seen = HashSet::new();
    let mut mics = Vec::new();
    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty() || !seen.insert(candidate.to_uppercase()) {
            continue;
        }
        mics.push(Mic::parse(candidate)?);
    }
    Ok(if mics.is_empty() { None } else { Some(mics) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RawEquityInput<'static> {
        RawEquityInput {
            name: "Acme, Inc.",
            symbol: "acme",
            isin: Some("US0000000001"),
            cusip: None,
            share_class_figi: None,
            mics: vec!["XNAS".to_string(), "XNAS".to_string()],
            currency: Some("usd"),
            last_price: Some("12.50"),
            market_cap: None,
        }
    }

    #[test]
    fn builds_with_normalisation() {
        let equity = RawEquity::build(sample()).unwrap();
        assert_eq!(equity.name, "ACME INC");
        assert_eq!(equity.symbol, "ACME");
        assert_eq!(equity.mics.unwrap().len(), 1);
        assert_eq!(equity.currency.unwrap().as_str(), "USD");
    }

    #[test]
    fn rejects_empty_name() {
        let mut input = sample();
        input.name = "   ";
        assert!(RawEquity::build(input).is_err());
    }

    use proptest::prelude::*;

    proptest! {
        // Building a RawEquity twice from the same input bag yields
        // equal records: `build` is a pure function of its input, so
        // there is no hidden state to drift between the two calls.
        #[test]
        fn build_is_deterministic(
            name in "[A-Za-z ]{1,20}",
            symbol in "[A-Za-z]{1,6}",
            last_price in "[1-9][0-9]{0,4}\\.[0-9]{2}",
        ) {
            let input = RawEquityInput {
                name: &name,
                symbol: &symbol,
                isin: None,
                cusip: None,
                share_class_figi: None,
                mics: vec![],
                currency: Some("USD"),
                last_price: Some(&last_price),
                market_cap: None,
            };

            let first = RawEquity::build(input.clone());
            let second = RawEquity::build(input);
            prop_assert_eq!(first, second);
        }
    }
}
