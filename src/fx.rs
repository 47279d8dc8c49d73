//! FX conversion to USD, loaded once per run and shared immutably.
//!
//! Grounded in the original source's `domain/_utils/_convert.py` and the
//! `exchange_rate_api` vendor client: a rate table is fetched once,
//! cached, and every conversion after that is a pure function over it.

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::cache::CacheStore;
use crate::error::{Error, Result};

const CACHE_NAME: &str = "usd_fx_rates";
const BASE_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
struct ExchangeRateApiResponse {
    result: String,
    conversion_rates: HashMap<String, Decimal>,
}

/// An immutable USD rate table, one per pipeline run.
#[derive(Debug, Clone)]
pub struct UsdConverter {
    rates: Arc<HashMap<String, Decimal>>,
}

impl UsdConverter {
    /// Fetches (or loads from cache) the USD conversion rate table and
    /// returns a converter closed over it.
    pub async fn load(client: &Client, cache: &CacheStore, api_key: &str) -> Result<Self> {
        if let Some(cached) = cache.load_cache(CACHE_NAME)? {
            if let Ok(rates) = serde_json::from_value::<HashMap<String, Decimal>>(cached) {
                return Ok(Self {
                    rates: Arc::new(rates),
                });
            }
        }

        let url = format!("https://v6.exchangerate-api.com/v6/{api_key}/latest/{BASE_CURRENCY}");
        let response = crate::http::retry(crate::http::DEFAULT_MAX_RETRIES, || async { client.get(&url).send().await })
            .await?
            .json::<ExchangeRateApiResponse>()
            .await?;

        if response.result != "success" {
            return Err(Error::Data(format!(
                "exchange rate vendor reported failure: {}",
                response.result
            )));
        }

        cache.save_cache(
            CACHE_NAME,
            &serde_json::to_value(&response.conversion_rates).map_err(|e| Error::Data(e.to_string()))?,
        )?;

        Ok(Self {
            rates: Arc::new(response.conversion_rates),
        })
    }

    pub fn from_rates(rates: HashMap<String, Decimal>) -> Self {
        Self {
            rates: Arc::new(rates),
        }
    }

    /// Converts `figure` from `currency` into USD, quantised to two
    /// decimal places. USD figures pass through unchanged. Fails if the
    /// currency is unknown or its rate is zero.
    pub fn convert(&self, figure: Decimal, currency: &str) -> Result<Decimal> {
        if currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Ok(figure.round_dp(2));
        }

        let rate = self
            .rates
            .get(&currency.to_uppercase())
            .ok_or_else(|| Error::Data(format!("no USD conversion rate for currency {currency:?}")))?;

        if rate.is_zero() {
            return Err(Error::Data(format!(
                "USD conversion rate for currency {currency:?} is zero"
            )));
        }

        Ok((figure / rate).round_dp(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn converter() -> UsdConverter {
        let mut rates = HashMap::new();
        rates.insert("EUR".to_string(), Decimal::new(92, 2)); // 0.92
        rates.insert("ZER".to_string(), Decimal::ZERO);
        UsdConverter::from_rates(rates)
    }

    #[test]
    fn usd_passes_through_unchanged() {
        let converter = converter();
        let result = converter.convert(Decimal::new(10000, 2), "USD").unwrap();
        assert_eq!(result, Decimal::new(10000, 2));
    }

    #[test]
    fn converts_using_rate_table() {
        let converter = converter();
        let result = converter.convert(Decimal::new(9200, 2), "EUR").unwrap();
        assert_eq!(result, Decimal::new(10000, 2));
    }

    #[test]
    fn zero_rate_is_an_error() {
        let converter = converter();
        assert!(converter.convert(Decimal::ONE, "ZER").is_err());
    }

    #[test]
    fn unknown_currency_is_an_error() {
        let converter = converter();
        assert!(converter.convert(Decimal::ONE, "XXX").is_err());
    }
}
