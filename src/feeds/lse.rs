//! London Stock Exchange-style feed: the discovery page (page 0) reveals
//! `totalPages`, after which the remaining pages are fetched concurrently
//! (bounded); falls back to a serial crawl terminating on an empty page if
//! `totalPages` is absent. A 4xx on the discovery page counts as zero
//! results rather than a fatal error.
//!
//! Grounded in the original source's `authoritative_feeds/lse.py`.

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

const SEARCH_URL: &str = "https://api.londonstockexchange.com/api/v1/components/refresh";
const PAGE_SIZE: usize = 100;
const CACHE_NAME: &str = "lse_records";
const COMPONENT_ID: &str = "block_content%3A9524a5dd-7053-4f7a-ac75-71d12db796b4";

#[derive(Debug, Serialize)]
struct Component {
    #[serde(rename = "componentId")]
    component_id: &'static str,
    parameters: String,
}

#[derive(Debug, Serialize)]
struct SearchPayload {
    path: &'static str,
    parameters: String,
    components: Vec<Component>,
}

fn build_payload(page: usize, page_size: usize) -> SearchPayload {
    SearchPayload {
        path: "live-markets/market-data-dashboard/price-explorer",
        parameters: format!(
            "markets%3DMAINMARKET%26categories%3DEQUITY%26indices%3DASX%26showonlylse%3Dtrue&page%3D{page}"
        ),
        components: vec![Component {
            component_id: COMPONENT_ID,
            parameters: format!(
                "markets=MAINMARKET&categories=EQUITY&indices=ASX&showonlylse=true&page={page}&size={page_size}"
            ),
        }],
    }
}

pub async fn fetch_records(
    client: &Client,
    cache: &CacheStore,
    max_concurrent_pages: usize,
    fatal_on_error: bool,
) -> Result<Vec<FeedRecord>> {
    if let Some(cached) = cache.load_cache(CACHE_NAME)? {
        if let Ok(records) = serde_json::from_value::<Vec<Value>>(cached) {
            info!(count = records.len(), "loaded lse records from cache");
            return Ok(records.into_iter().map(to_feed_record).collect());
        }
    }

    let result = fetch_all(client, max_concurrent_pages).await;
    let records = match result {
        Ok(records) => records,
        Err(error) => {
            error!(%error, "fatal error while fetching lse records");
            if fatal_on_error {
                std::process::exit(1);
            }
            Vec::new()
        }
    };

    let payload = serde_json::to_value(&records).map_err(|e| crate::error::Error::Data(e.to_string()))?;
    cache.save_cache(CACHE_NAME, &payload)?;
    info!(count = records.len(), "saved lse records to cache");

    Ok(records.into_iter().map(to_feed_record).collect())
}

async fn fetch_all(client: &Client, max_concurrent_pages: usize) -> std::result::Result<Vec<Value>, String> {
    let first_page = match fetch_page(client, 0).await {
        Ok(page) => page,
        Err(Fetch::ClientError(_)) => return Ok(Vec::new()),
        Err(Fetch::Other(message)) => return Err(message),
    };

    let (first_rows, total_pages) = parse_page(&first_page);
    let mut records = first_rows;

    match total_pages {
        Some(total_pages) if total_pages > 1 => {
            let semaphore = Arc::new(Semaphore::new(max_concurrent_pages));
            let pages: Vec<usize> = (1..total_pages).collect();
            let mut stream = stream::iter(pages.into_iter().map(|page| {
                let client = client.clone();
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.map_err(|e| e.to_string())?;
                    fetch_page(&client, page).await.map_err(Fetch::into_message)
                }
            }))
            .buffer_unordered(max_concurrent_pages);

            while let Some(page) = stream.next().await {
                records.extend(parse_page(&page?).0);
            }
        }
        // totalPages unknown: crawl serially starting from page 1 until a
        // page comes back empty.
        None => {
            let mut page = 1;
            loop {
                let body = fetch_page(client, page).await.map_err(Fetch::into_message)?;
                let (rows, _) = parse_page(&body);
                if rows.is_empty() {
                    break;
                }
                records.extend(rows);
                page += 1;
            }
        }
        _ => {}
    }

    Ok(records)
}

enum Fetch {
    ClientError(reqwest::StatusCode),
    Other(String),
}

impl Fetch {
    fn into_message(self) -> String {
        match self {
            Fetch::ClientError(status) => format!("lse request returned client error {status}"),
            Fetch::Other(message) => message,
        }
    }
}

/// Fetches one page, unwrapping the API's single-element array response
/// envelope.
async fn fetch_page(client: &Client, page: usize) -> std::result::Result<Value, Fetch> {
    let payload = build_payload(page, PAGE_SIZE);

    let response = crate::http::retry(crate::http::DEFAULT_MAX_RETRIES, || async {
        client.post(SEARCH_URL).json(&payload).send().await.map_err(|e| Fetch::Other(e.to_string()))
    })
    .await?;

    let status = response.status();
    if status.is_client_error() {
        return Err(Fetch::ClientError(status));
    }
    if !status.is_success() {
        return Err(Fetch::Other(format!("lse page {page} returned {status}")));
    }

    let mut body: Vec<Value> = response.json().await.map_err(|e| Fetch::Other(e.to_string()))?;
    if body.is_empty() {
        return Err(Fetch::Other(format!("lse page {page} returned an empty response array")));
    }
    Ok(body.swap_remove(0))
}

/// Locates the `priceexplorersearch` component within the page envelope
/// and returns its items plus `totalPages`, if present.
fn parse_page(body: &Value) -> (Vec<Value>, Option<usize>) {
    let component = body
        .get("content")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|c| c.get("name").and_then(Value::as_str) == Some("priceexplorersearch"));

    let Some(component) = component else {
        return (Vec::new(), None);
    };

    let value = component.get("value");
    let total_pages = value
        .and_then(|v| v.get("totalPages"))
        .and_then(Value::as_u64)
        .map(|v| v as usize);

    let rows = value
        .and_then(|v| v.get("content"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .filter_map(parse_row)
        .collect();

    (rows, total_pages)
}

fn parse_row(row: Value) -> Option<Value> {
    let name = row.get("issuername").and_then(Value::as_str)?.to_string();
    let symbol = row.get("tidm").and_then(Value::as_str)?.to_string();
    let isin = row.get("isin").and_then(Value::as_str).unwrap_or_default();
    let currency = row.get("currency").and_then(Value::as_str).unwrap_or_default();
    let last_price = row.get("lastprice").map(|v| v.to_string()).unwrap_or_default();
    let market_cap = row
        .get("marketcapitalization")
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
}

fn to_feed_record(raw: Value) -> FeedRecord {
    FeedRecord {
        feed: FeedKind::Lse,
        raw_data: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(rows: Vec<Value>, total_pages: Option<usize>) -> Value {
        let mut value = serde_json::json!({ "content": rows });
        if let Some(total_pages) = total_pages {
            value["totalPages"] = serde_json::json!(total_pages);
        }
        serde_json::json!({
            "content": [
                { "name": "priceexplorersearch", "value": value },
            ]
        })
    }

    #[test]
    fn parses_rows_and_total_pages_from_the_component_envelope() {
        let row = serde_json::json!({
            "issuername": "Example Plc",
            "tidm": "EXM",
            "isin": "GB0000000001",
            "currency": "GBP",
            "lastprice": 123.45,
            "marketcapitalization": 9_876_543,
        });
        let body = envelope(vec![row], Some(4));

        let (rows, total_pages) = parse_page(&body);
        assert_eq!(total_pages, Some(4));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "Example Plc");
        assert_eq!(rows[0]["symbol"], "EXM");
        assert_eq!(rows[0]["last_price"], "123.45");
    }

    #[test]
    fn missing_component_yields_no_rows_and_no_total() {
        let body = serde_json::json!({ "content": [] });
        let (rows, total_pages) = parse_page(&body);
        assert!(rows.is_empty());
        assert_eq!(total_pages, None);
    }

    #[test]
    fn skips_rows_missing_required_fields() {
        let row = serde_json::json!({ "issuername": "No Ticker" });
        let body = envelope(vec![row], None);
        let (rows, _) = parse_page(&body);
        assert!(rows.is_empty());
    }
}
