//! Euronext-style feed: fans out one producer task per market (MIC),
//! each paging through a DataTables-backed search endpoint, fanning in
//! over a shared bounded queue. Deduplicated by ISIN across all markets.
//!
//! Grounded in the original source's
//! `authoritative_feeds/euronext.py`.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::schemas::{FeedKind, FeedRecord};

const SEARCH_URL: &str = "https://live.euronext.com/en/pd_es/data/stocks";
const PAGE_SIZE: usize = 100;
const CACHE_NAME: &str = "euronext_records";

const COUNTRY_TO_MIC: &[(&str, &str)] = &[
    ("France", "XPAR"),
    ("Netherlands", "XAMS"),
    ("Belgium", "XBRU"),
    ("Ireland", "XMSM"),
    ("Portugal", "XLIS"),
    ("Italy", "MTAA"),
    ("Norway", "XOSL"),
];

#[derive(Debug, Serialize)]
struct DataTablesPayload {
    draw: usize,
    start: usize,
    length: usize,
    #[serde(rename = "iDisplayLength")]
    i_display_length: usize,
    #[serde(rename = "iDisplayStart")]
    i_display_start: usize,
}

/// Fetches every Euronext equity record exactly once, deduplicated by
/// ISIN, using the cache if a prior run already populated it.
pub async fn fetch_records(
    client: &Client,
    cache: &CacheStore,
    max_concurrent_pages: usize,
    fatal_on_error: bool,
) -> Result<Vec<FeedRecord>> {
    if let Some(cached) = cache.load_cache(CACHE_NAME)? {
        if let Ok(records) = serde_json::from_value::<Vec<Value>>(cached) {
            info!(count = records.len(), "loaded euronext records from cache");
            return Ok(records.into_iter().map(to_feed_record).collect());
        }
    }

    let semaphore = Arc::new(Semaphore::new(max_concurrent_pages));
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let mut producers = Vec::new();
    for (_, mic) in COUNTRY_TO_MIC {
        let client = client.clone();
        let mic = mic.to_string();
        let tx = tx.clone();
        let semaphore = semaphore.clone();
        producers.push(tokio::spawn(async move {
            stream_mic(&client, &mic, semaphore, tx).await
        }));
    }
    drop(tx);

    let mut seen_isins = HashSet::new();
    let mut buffer = Vec::new();
    while let Some(record) = rx.recv().await {
        let isin = record.get("isin").and_then(Value::as_str).unwrap_or_default().to_string();
        if seen_isins.insert(isin) {
            buffer.push(record);
        }
    }

    for producer in producers {
        if let Err(error) = producer.await.unwrap_or(Ok(())) {
            error!(%error, "euronext feed producer failed");
            if fatal_on_error {
                std::process::exit(1);
            }
        }
    }

    let payload = serde_json::to_value(&buffer).map_err(|e| crate::error::Error::Data(e.to_string()))?;
    cache.save_cache(CACHE_NAME, &payload)?;
    info!(count = buffer.len(), "saved euronext records to cache");

    Ok(buffer.into_iter().map(to_feed_record).collect())
}

async fn stream_mic(
    client: &Client,
    mic: &str,
    semaphore: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<Value>,
) -> std::result::Result<(), String> {
    let url = format!("{SEARCH_URL}?mics={mic}");
    let mut start = 0usize;
    let mut draw = 1usize;
    let mut row_count = 0usize;

    loop {
        let _permit = semaphore.acquire().await.map_err(|e| e.to_string())?;
        let payload = DataTablesPayload {
            draw,
            start,
            length: PAGE_SIZE,
            i_display_length: PAGE_SIZE,
            i_display_start: start,
        };

        let response = crate::http::retry(crate::http::DEFAULT_MAX_RETRIES, || async {
            client.post(&url).form(&payload).send().await.map_err(|e| e.to_string())
        })
        .await?;
        if !response.status().is_success() {
            return Err(format!("euronext MIC {mic} returned {}", response.status()));
        }
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        drop(_permit);

        for row in body.get("aaData").and_then(Value::as_array).into_iter().flatten() {
            if let Some(record) = parse_row(row) {
                row_count += 1;
                let _ = tx.send(record);
            }
        }

        let total_records = body
            .get("iTotalRecords")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<usize>().ok())
            .or_else(|| body.get("iTotalRecords").and_then(Value::as_u64).map(|v| v as usize))
            .unwrap_or(0);

        if start + PAGE_SIZE >= total_records {
            break;
        }
        start += PAGE_SIZE;
        draw += 1;
    }

    let _ = row_count;
    Ok(())
}

fn name_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r">(.*?)<").unwrap())
}

fn price_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| Regex::new(r">([A-Z]{3})\s*<span[^>]*>([\d.,]+)</span>").unwrap())
}

fn parse_row(row: &Value) -> Option<Value> {
    let cells: Vec<&str> = row.as_array()?.iter().map(|v| v.as_str().unwrap_or("")).collect();
    if cells.len() < 6 {
        return None;
    }

    let name = name_re()
        .captures(cells[1])
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| cells[1].trim().to_string());

    let mic_match = name_re().captures(cells[4]);
    let mics: Vec<String> = mic_match
        .map(|c| c[1].split(',').map(|s| s.trim().to_string()).collect())
        .unwrap_or_default();

    let (currency, last_price) = price_re()
        .captures(cells[5])
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .unwrap_or_default();

    Some(serde_json::json!({
        "name": name,
        "symbol": cells[3].trim(),
        "isin": cells[2].trim(),
        "mics": mics,
        "currency": currency,
        "last_price": last_price,
    }))
}

fn to_feed_record(raw: Value) -> FeedRecord {
    FeedRecord {
        feed: FeedKind::Euronext,
        raw_data: raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_row() {
        let row = serde_json::json!([
            "ignored",
            "<a href=\"#\">Acme Corp</a>",
            " FR0000000001 ",
            " ACM ",
            "<span>XPAR, XAMS</span>",
            "<span>EUR <span class=\"price\">12.34</span></span>",
        ]);
        let record = parse_row(&row).unwrap();
        assert_eq!(record["name"], "Acme Corp");
        assert_eq!(record["isin"], "FR0000000001");
        assert_eq!(record["symbol"], "ACM");
        assert_eq!(record["mics"], serde_json::json!(["XPAR", "XAMS"]));
        assert_eq!(record["currency"], "EUR");
        assert_eq!(record["last_price"], "12.34");
    }

    #[test]
    fn rejects_rows_with_too_few_cells() {
        let row = serde_json::json!(["a", "b"]);
        assert!(parse_row(&row).is_none());
    }
}
