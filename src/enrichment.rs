//! The supplementary enrichment vendor client: looks up a raw equity by
//! ISIN, CUSIP, or fuzzy name/symbol match and returns whatever
//! financial fields the vendor can supply for fields this crate's
//! authoritative feeds left blank.
//!
//! Grounded in the original source's
//! `enrichment_feeds/yfinance/{session,api,feed,errors}.py`: a lazily
//! bootstrapped anti-CSRF token behind a mutex, a session-wide semaphore
//! capping concurrent HTTP/2 streams, one retry on an expired token, and
//! a module-dict flatten (later modules win) with a fallback endpoint.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::EnrichmentError;
use crate::fuzzy::weighted_ratio;
use crate::fx::UsdConverter;
use crate::schemas::RawEquity;

const CACHE_NAME: &str = "enrichment";

/// One candidate lookup in the ordered attempt list: an identifier
/// search requires a `longname` on the candidate, the fuzzy fallback
/// requires only a `shortname`.
enum LookupAttempt {
    Identifier(String),
    Fuzzy(String),
}

impl LookupAttempt {
    fn query(&self) -> &str {
        match self {
            LookupAttempt::Identifier(value) | LookupAttempt::Fuzzy(value) => value,
        }
    }

    fn name_field(&self) -> &'static str {
        match self {
            LookupAttempt::Identifier(_) => "longname",
            LookupAttempt::Fuzzy(_) => "shortname",
        }
    }
}

const DEFAULT_MODULES: &[&str] = &["price", "summaryDetail", "quoteType", "assetProfile"];

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub search_url: String,
    pub quote_summary_url: String,
    pub quote_summary_fallback_url: String,
    pub crumb_url: String,
    pub min_score: i64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            search_url: "https://query2.finance.yahoo.com/v1/finance/search".to_string(),
            quote_summary_url: "https://query2.finance.yahoo.com/v10/finance/quoteSummary/".to_string(),
            quote_summary_fallback_url: "https://query1.finance.yahoo.com/v7/finance/quote".to_string(),
            crumb_url: "https://query2.finance.yahoo.com/v1/test/getcrumb".to_string(),
            min_score: 150,
        }
    }
}

struct SessionState {
    crumb: Mutex<Option<String>>,
}

/// An enrichment session shared across lookups within a run. Holds the
/// shared HTTP client, the lazily-fetched crumb, and the global stream
/// cap semaphore.
pub struct EnrichmentSession {
    client: Client,
    config: EnrichmentConfig,
    state: Arc<SessionState>,
    stream_semaphore: Arc<Semaphore>,
    converter: UsdConverter,
}

impl EnrichmentSession {
    pub fn new(
        client: Client,
        config: EnrichmentConfig,
        max_concurrent_streams: usize,
        converter: UsdConverter,
    ) -> Self {
        Self {
            client,
            config,
            state: Arc::new(SessionState {
                crumb: Mutex::new(None),
            }),
            stream_semaphore: Arc::new(Semaphore::new(max_concurrent_streams)),
            converter,
        }
    }

    /// Looks up enrichment data for a raw equity, returning a
    /// `RawEquity` carrying whatever fields the vendor could supply.
    ///
    /// Checks the cache under the caller's symbol first. On a miss, runs
    /// an ordered list of attempts — by ISIN, by CUSIP, then a fuzzy
    /// name/symbol fallback, skipping identifier attempts the equity
    /// has no value for — and returns the first one that succeeds,
    /// caching the result. If every attempt fails, the lookup raises an
    /// empty-summary error regardless of which attempt-level error
    /// caused the final failure.
    pub async fn enrich(&self, equity: &RawEquity, cache: &CacheStore) -> Result<RawEquity, EnrichmentError> {
        if let Ok(Some(cached)) = cache.load_cache_entry(CACHE_NAME, &equity.symbol) {
            return self.summary_to_raw_equity(equity, &cached);
        }

        let mut attempts = Vec::new();
        if let Some(isin) = &equity.isin {
            attempts.push(LookupAttempt::Identifier(isin.as_str().to_string()));
        }
        if let Some(cusip) = &equity.cusip {
            attempts.push(LookupAttempt::Identifier(cusip.as_str().to_string()));
        }
        attempts.push(LookupAttempt::Fuzzy(format!("{} {}", equity.name, equity.symbol)));

        for attempt in &attempts {
            match self.try_attempt(attempt, &equity.name, &equity.symbol).await {
                Ok(summary) => {
                    if let Err(error) = cache.save_cache_entry(CACHE_NAME, &equity.symbol, &summary) {
                        debug!(%error, symbol = %equity.symbol, "failed to cache enrichment result");
                    }
                    return self.summary_to_raw_equity(equity, &summary);
                }
                Err(error) => {
                    debug!(%error, symbol = %equity.symbol, query = attempt.query(), "enrichment attempt failed, trying next");
                }
            }
        }

        Err(EnrichmentError::EmptySummary(equity.symbol.clone()))
    }

    /// Runs one attempt end to end: search, filter to viable candidates,
    /// pick the best, then fetch its detailed summary.
    async fn try_attempt(
        &self,
        attempt: &LookupAttempt,
        expected_name: &str,
        expected_symbol: &str,
    ) -> Result<Value, EnrichmentError> {
        let query = attempt.query();
        let name_field = attempt.name_field();

        let quotes = self.search_quotes(query).await;
        if quotes.is_empty() {
            return Err(EnrichmentError::NoQuotes(query.to_string()));
        }

        let viable: Vec<&Value> = quotes
            .iter()
            .filter(|quote| {
                quote.get("symbol").and_then(Value::as_str).is_some()
                    && quote.get(name_field).and_then(Value::as_str).is_some()
            })
            .collect();
        if viable.is_empty() {
            return Err(EnrichmentError::NoEquityData(query.to_string()));
        }

        let chosen_symbol = self.choose_symbol(&viable, name_field, expected_name, expected_symbol)?;

        let summary = self
            .quote_summary(&chosen_symbol)
            .await
            .ok_or_else(|| EnrichmentError::NoEquityData(chosen_symbol.clone()))?;

        if summary.as_object().map(|m| m.is_empty()).unwrap_or(true) {
            return Err(EnrichmentError::EmptySummary(chosen_symbol));
        }

        Ok(summary)
    }

    /// Picks the best candidate among already-viable quotes: a single
    /// candidate wins outright; candidates sharing the same name field
    /// value defer to the first in vendor order; otherwise the highest
    /// combined fuzzy score wins, rejecting scores below the configured
    /// minimum.
    fn choose_symbol(
        &self,
        quotes: &[&Value],
        name_field: &str,
        expected_name: &str,
        expected_symbol: &str,
    ) -> Result<String, EnrichmentError> {
        if quotes.len() == 1 {
            if let Some(symbol) = quotes[0].get("symbol").and_then(Value::as_str) {
                return Ok(symbol.to_string());
            }
        }

        let first_name = quotes[0].get(name_field).and_then(Value::as_str);
        if let Some(first_name) = first_name {
            let all_share_name = quotes
                .iter()
                .all(|quote| quote.get(name_field).and_then(Value::as_str) == Some(first_name));
            if all_share_name {
                if let Some(symbol) = quotes[0].get("symbol").and_then(Value::as_str) {
                    return Ok(symbol.to_string());
                }
            }
        }

        let mut best: Option<(i64, String)> = None;
        for quote in quotes {
            let symbol = quote.get("symbol").and_then(Value::as_str).unwrap_or_default();
            let name = quote.get(name_field).and_then(Value::as_str).unwrap_or("<no-name>");

            let score = weighted_ratio(symbol, expected_symbol, name, expected_name);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, symbol.to_string()));
            }
        }

        match best {
            Some((score, symbol)) if score >= self.config.min_score => Ok(symbol),
            Some((score, _)) => Err(EnrichmentError::LowFuzzyScore {
                query: expected_symbol.to_string(),
                score,
                minimum: self.config.min_score,
            }),
            None => Err(EnrichmentError::NoEquityData(expected_symbol.to_string())),
        }
    }

    async fn search_quotes(&self, query: &str) -> Vec<Value> {
        let response = match self.get(&self.config.search_url.clone(), &[("q", query)]).await {
            Ok(response) => response,
            Err(_) => return Vec::new(),
        };

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) => return Vec::new(),
        };

        body.get("quotes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|quote| quote.get("quoteType").and_then(Value::as_str) == Some("EQUITY"))
            .collect()
    }

    async fn quote_summary(&self, ticker: &str) -> Option<Value> {
        let url = format!("{}{}", self.config.quote_summary_url, ticker);
        let modules = DEFAULT_MODULES.join(",");

        let response = self
            .get(
                &url,
                &[
                    ("modules", modules.as_str()),
                    ("corsDomain", "finance.yahoo.com"),
                    ("formatted", "false"),
                    ("symbol", ticker),
                    ("lang", "en-US"),
                    ("region", "US"),
                ],
            )
            .await
            .ok()?;

        let body: Value = response.json().await.ok()?;
        let result = body
            .get("quoteSummary")
            .and_then(|qs| qs.get("result"))
            .and_then(Value::as_array)
            .and_then(|arr| arr.first());

        match result {
            Some(first) => Some(flatten_modules(DEFAULT_MODULES, first)),
            None => self.quote_summary_fallback(ticker).await,
        }
    }

    async fn quote_summary_fallback(&self, ticker: &str) -> Option<Value> {
        let response = self
            .get(
                &self.config.quote_summary_fallback_url.clone(),
                &[
                    ("corsDomain", "finance.yahoo.com"),
                    ("formatted", "false"),
                    ("symbols", ticker),
                    ("lang", "en-US"),
                    ("region", "US"),
                ],
            )
            .await
            .ok()?;
        let body: Value = response.json().await.ok()?;
        body.get("quoteResponse")
            .and_then(|qr| qr.get("result"))
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .cloned()
    }

    /// GETs a URL with the session's crumb attached once bootstrapped,
    /// capped by the shared stream semaphore, retrying once on a 401 by
    /// re-bootstrapping the crumb.
    async fn get(&self, url: &str, params: &[(&str, &str)]) -> reqwest::Result<reqwest::Response> {
        let _permit = self.stream_semaphore.acquire().await.expect("semaphore not closed");

        let mut query = params.to_vec();
        let requires_crumb = url.starts_with(&self.config.quote_summary_url);
        let crumb = if requires_crumb {
            self.state.crumb.lock().clone()
        } else {
            None
        };
        if let Some(crumb) = &crumb {
            query.push(("crumb", crumb));
        }

        let response = self.client.get(url).query(&query).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED && requires_crumb {
            self.bootstrap_crumb().await?;
            let mut retry_query = params.to_vec();
            let crumb = self.state.crumb.lock().clone();
            if let Some(crumb) = &crumb {
                retry_query.push(("crumb", crumb));
            }
            return self.client.get(url).query(&retry_query).send().await;
        }

        Ok(response)
    }

    async fn bootstrap_crumb(&self) -> reqwest::Result<()> {
        if self.state.crumb.lock().is_some() {
            return Ok(());
        }

        for seed in ["https://fc.yahoo.com", "https://finance.yahoo.com"] {
            let _ = self.client.get(seed).send().await;
        }

        let response = self.client.get(&self.config.crumb_url).send().await?;
        let text = response.text().await?;
        *self.state.crumb.lock() = Some(text.trim().trim_matches('"').to_string());
        Ok(())
    }

    /// Builds a `RawEquity` from a vendor summary, filling in only the
    /// fields the caller's record is still missing. The vendor reports
    /// its own price and market cap in its own currency, so each figure
    /// is converted to USD before it is merged in; a currency absent
    /// from the rate table, or a zero rate, fails this lookup the same
    /// way any other enrichment attempt can fail.
    fn summary_to_raw_equity(&self, existing: &RawEquity, summary: &Value) -> Result<RawEquity, EnrichmentError> {
        let currency = summary.get("currency").and_then(Value::as_str).map(str::to_string);
        let raw_last_price = summary
            .get("regularMarketPrice")
            .and_then(Value::as_f64)
            .and_then(rust_decimal::Decimal::from_f64_retain);
        let raw_market_cap = summary
            .get("marketCap")
            .and_then(Value::as_f64)
            .and_then(rust_decimal::Decimal::from_f64_retain);

        let mut updated = existing.clone();

        if updated.last_price.is_none() {
            updated.last_price = self.convert_vendor_figure(raw_last_price, currency.as_deref())?;
        }
        if updated.market_cap.is_none() {
            updated.market_cap = self.convert_vendor_figure(raw_market_cap, currency.as_deref())?;
        }
        if updated.currency.is_none() {
            if let Some(currency) = currency {
                updated.currency = crate::schemas::Currency::parse(&currency).ok();
            }
        }

        Ok(updated)
    }

    /// Converts a vendor figure to USD using its reported currency. A
    /// figure with no currency to convert from, or no figure at all,
    /// passes through untouched.
    fn convert_vendor_figure(
        &self,
        figure: Option<rust_decimal::Decimal>,
        currency: Option<&str>,
    ) -> Result<Option<rust_decimal::Decimal>, EnrichmentError> {
        match (figure, currency) {
            (Some(figure), Some(currency)) => self
                .converter
                .convert(figure, currency)
                .map(Some)
                .map_err(|error| EnrichmentError::UsdConversion(error.to_string())),
            (figure, _) => Ok(figure),
        }
    }
}

fn flatten_modules(modules: &[&str], payload: &Value) -> Value {
    let mut merged = serde_json::Map::new();
    for module in modules {
        if let Some(Value::Object(map)) = payload.get(*module) {
            for (key, value) in map {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session() -> EnrichmentSession {
        EnrichmentSession::new(Client::new(), EnrichmentConfig::default(), 4, converter())
    }

    fn converter() -> UsdConverter {
        let mut rates = std::collections::HashMap::new();
        rates.insert("GBP".to_string(), rust_decimal::Decimal::new(79, 2));
        UsdConverter::from_rates(rates)
    }

    fn raw_equity(symbol: &str) -> RawEquity {
        RawEquity::build(crate::schemas::RawEquityInput {
            name: "Example Corp",
            symbol,
            isin: None,
            cusip: None,
            share_class_figi: None,
            mics: Vec::new(),
            currency: None,
            last_price: None,
            market_cap: None,
        })
        .unwrap()
    }

    #[test]
    fn choose_symbol_picks_sole_viable_candidate() {
        let quote = json!({"symbol": "EXC", "longname": "Example Corp"});
        let quotes = vec![&quote];
        let chosen = session()
            .choose_symbol(&quotes, "longname", "Example Corp", "EXC")
            .unwrap();
        assert_eq!(chosen, "EXC");
    }

    #[test]
    fn choose_symbol_defers_to_first_when_names_match() {
        let a = json!({"symbol": "EXC", "longname": "Example Corp"});
        let b = json!({"symbol": "EXC2", "longname": "Example Corp"});
        let quotes = vec![&a, &b];
        let chosen = session()
            .choose_symbol(&quotes, "longname", "Example Corp", "EXC")
            .unwrap();
        assert_eq!(chosen, "EXC");
    }

    #[test]
    fn choose_symbol_falls_back_to_fuzzy_score() {
        let close = json!({"symbol": "EXC", "longname": "Example Corp"});
        let distant = json!({"symbol": "ZZZ", "longname": "Totally Unrelated Holdings"});
        let quotes = vec![&close, &distant];
        let chosen = session()
            .choose_symbol(&quotes, "longname", "Example Corp", "EXC")
            .unwrap();
        assert_eq!(chosen, "EXC");
    }

    #[test]
    fn choose_symbol_rejects_score_below_minimum() {
        let config = EnrichmentConfig {
            min_score: 195,
            ..Default::default()
        };
        let session = EnrichmentSession::new(Client::new(), config, 4, converter());
        let distant = json!({"symbol": "ZZZ", "longname": "Totally Unrelated Holdings"});
        let quotes = vec![&distant];
        let err = session
            .choose_symbol(&quotes, "longname", "Example Corp", "EXC")
            .unwrap_err();
        assert!(matches!(err, EnrichmentError::LowFuzzyScore { .. }));
    }

    #[test]
    fn identifier_attempt_requires_longname() {
        let attempt = LookupAttempt::Identifier("US0000000001".to_string());
        assert_eq!(attempt.name_field(), "longname");
        assert_eq!(attempt.query(), "US0000000001");
    }

    #[test]
    fn fuzzy_attempt_requires_shortname() {
        let attempt = LookupAttempt::Fuzzy("Example Corp EXC".to_string());
        assert_eq!(attempt.name_field(), "shortname");
    }

    #[tokio::test]
    async fn enrich_returns_cached_result_without_a_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path().join("store.db"), 0).unwrap();
        let equity = raw_equity("EXC");

        cache
            .save_cache_entry(
                CACHE_NAME,
                &equity.symbol,
                &json!({"currency": "GBP", "regularMarketPrice": 79.0}),
            )
            .unwrap();

        let enriched = session().enrich(&equity, &cache).await.unwrap();
        assert_eq!(enriched.currency.unwrap().as_str(), "GBP");
        assert_eq!(enriched.last_price.unwrap().to_string(), "100.00");
    }

    #[tokio::test]
    async fn enrich_fails_when_the_cached_vendor_currency_has_no_known_rate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheStore::open(dir.path().join("store.db"), 0).unwrap();
        let equity = raw_equity("EXC");

        cache
            .save_cache_entry(
                CACHE_NAME,
                &equity.symbol,
                &json!({"currency": "CHF", "regularMarketPrice": 12.5}),
            )
            .unwrap();

        let err = session().enrich(&equity, &cache).await.unwrap_err();
        assert!(matches!(err, EnrichmentError::UsdConversion(_)));
    }
}
