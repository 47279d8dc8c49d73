//! Xetra-style feed: a `recordsTotal`-driven fan-out, sorted by
//! turnover descending, defaulting to XETR/EUR where the payload omits
//! them.
//!
//! Grounded in the original source's `authoritative_feeds/xetra.py`.

use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::schemas::{FeedKind, FeedRecord};

const SEARCH_URL: &str = "https://www.xetra.com/xetra-en/instruments/instruments/search";
const PAGE_SIZE: usize = 100;
const CACHE_NAME: &str = "xetra_records";

#[derive(Debug, Serialize)]
struct SearchPayload {
    offset: usize,
    limit: usize,
    sorting: &'static str,
    #[serde(rename = "sortOrder")]
    sort_order: &'static str,
}

pub async fn fetch_records(
    client: &Client,
    cache: &CacheStore,
    max_concurrent_pages: usize,
    fatal_on_error: bool,
) -> Result<Vec<FeedRecord>> {
    if let Some(cached) = cache.load_cache(CACHE_NAME)? {
        if let Ok(records) = serde_json::from_value::<Vec<Value>>(cached) {
            info!(count = records.len(), "loaded xetra records from cache");
            return Ok(records.into_iter().map(to_feed_record).collect());
        }
    }

    let result = fetch_all(client, max_concurrent_pages).await;
    let records = match result {
        Ok(records) => records,
        Err(error) => {
            error!(%error, "fatal error while fetching xetra records");
            if fatal_on_error {
                std::process::exit(1);
            }
            Vec::new()
        }
    };

    let payload = serde_json::to_value(&records).map_err(|e| crate::error::Error::Data(e.to_string()))?;
    cache.save_cache(CACHE_NAME, &payload)?;
    info!(count = records.len(), "saved xetra records to cache");

    Ok(records.into_iter().map(to_feed_record).collect())
}

async fn fetch_all(client: &Client, max_concurrent_pages: usize) -> std::result::Result<Vec<Value>, String> {
    let first_page = fetch_page(client, 0).await?;
    let mut records = parse_rows(&first_page);

    let total_records = first_page
        .get("recordsTotal")
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(0);

    let total_pages = total_records.div_ceil(PAGE_SIZE);

    if total_pages > 1 {
        let semaphore = Arc::new(Semaphore::new(max_concurrent_pages));
        let offsets: Vec<usize> = (1..total_pages).map(|p| p * PAGE_SIZE).collect();
        let mut stream = stream::iter(offsets.into_iter().map(|offset| {
            let client = client.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.map_err(|e| e.to_string())?;
                fetch_page_at(&client, offset).await
            }
        }))
        .buffer_unordered(max_concurrent_pages);

        while let Some(page) = stream.next().await {
            records.extend(parse_rows(&page?));
        }
    }

    Ok(records)
}

async fn fetch_page(client: &Client, offset: usize) -> std::result::Result<Value, String> {
    fetch_page_at(client, offset).await
}

async fn fetch_page_at(client: &Client, offset: usize) -> std::result::Result<Value, String> {
    let payload = SearchPayload {
        offset,
        limit: PAGE_SIZE,
        sorting: "TURNOVER",
        sort_order: "DESC",
    };

    let response = crate::http::retry(crate::http::DEFAULT_MAX_RETRIES, || async {
        client.post(SEARCH_URL).json(&payload).send().await.map_err(|e| e.to_string())
    })
    .await?;
    if !response.status().is_success() {
        return Err(format!("xetra page at {offset} returned {}", response.status()));
    }
    response.json().await.map_err(|e| e.to_string())
}

/// Normalises a Xetra search row: `overview.lastPrice` and
/// `keyData.marketCapitalisation` are nested a level below the fields
/// this crate's other feeds report flat.
fn parse_rows(body: &Value) -> Vec<Value> {
    body.get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(|row| {
            let name = row.get("instrumentName").and_then(Value::as_str)?;
            let symbol = row.get("mnemonic").and_then(Value::as_str)?;
            let isin = row.get("isin").and_then(Value::as_str).unwrap_or_default();
            let currency = row
                .get("currency")
                .and_then(Value::as_str)
                .unwrap_or("EUR");
            let last_price = row
                .get("overview")
                .and_then(|o| o.get("lastPrice"))
                .map(|v| v.to_string())
                .unwrap_or_default();
            let market_cap = row
                .get("keyData")
                .and_then(|k| k.get("marketCapitalisation"))
                .map(|v| v.to_string())
                .unwrap_or_default();

            Some(serde_json::json!({
                "name": name,
                "symbol": symbol,
                "isin": isin,
                "currency": currency,
                "last_price": last_price.trim_matches('"'),
                "market_cap": market_cap.trim_matches('"'),
            }))
        })
        .collect()
}

fn to_feed_record(raw: Value) -> FeedRecord {
    FeedRecord {
        feed: FeedKind::Xetra,
        raw_data: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_overview_and_key_data() {
        let body = serde_json::json!({
            "data": [{
                "instrumentName": "Beispiel AG",
                "mnemonic": "BSP",
                "isin": "DE0000000001",
                "currency": "EUR",
                "overview": {"lastPrice": 12.5},
                "keyData": {"marketCapitalisation": 987654.0},
            }]
        });
        let rows = parse_rows(&body);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["last_price"], "12.5");
        assert_eq!(rows[0]["market_cap"], "987654.0");
    }

    #[test]
    fn defaults_currency_to_eur_when_absent() {
        let body = serde_json::json!({
            "data": [{
                "instrumentName": "Beispiel AG",
                "mnemonic": "BSP",
                "isin": "DE0000000001",
                "overview": {"lastPrice": 1.0},
            }]
        });
        let rows = parse_rows(&body);
        assert_eq!(rows[0]["currency"], "EUR");
    }
}
