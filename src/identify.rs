//! Resolves raw equities to their canonical share-class FIGI by batching
//! queries against the reference identifier vendor.
//!
//! Grounded in the original source's
//! `market_vendors/openfigi/openfigi.py`: chunk into batches of 100, cap
//! concurrency with a semaphore, and degrade an entire batch to all-null
//! results if anything in that batch's request/parse fails, so ordering
//! and length guarantees survive a single bad batch.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::Result;
use crate::schemas::{Figi, RawEquity};

const BATCH_SIZE: usize = 100;
const OPENFIGI_URL: &str = "https://api.openfigi.com/v3/mapping";
const CACHE_NAME: &str = "figi_identify";

#[derive(Debug, Serialize)]
struct MappingQuery {
    #[serde(rename = "idType")]
    id_type: &'static str,
    #[serde(rename = "idValue")]
    id_value: String,
    #[serde(rename = "marketSecDes")]
    market_sec_des: &'static str,
}

/// One flattened result row as returned by the mapping vendor: each row
/// carries the `query_number` it answers, pointing back into the
/// originating batch. A batch's response may contain zero, one, or
/// several rows per `query_number`.
#[derive(Debug, Deserialize)]
struct MappingResultRow {
    query_number: usize,
    #[serde(rename = "shareClassFIGI", default)]
    share_class_figi: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<serde_json::Value>,
    #[serde(rename = "securityName", default)]
    security_name: Option<serde_json::Value>,
    #[serde(default)]
    ticker: Option<serde_json::Value>,
}

fn as_non_empty_str(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().and_then(|v| v.as_str()).map(str::to_string)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentificationMatch {
    pub figi: Figi,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

/// A stable key for the whole ordered input, so an identical batch of
/// equities (same identifiers, same order) hits the cache instead of
/// re-querying the vendor. Hashes the `(isin, cusip, symbol)` triplet
/// per equity rather than the equities themselves, since those three
/// fields are exactly what the query construction below depends on.
fn cache_key(equities: &[RawEquity]) -> String {
    let mut hasher = DefaultHasher::new();
    equities.len().hash(&mut hasher);
    for equity in equities {
        equity.isin.as_ref().map(|v| v.as_str()).hash(&mut hasher);
        equity.cusip.as_ref().map(|v| v.as_str()).hash(&mut hasher);
        equity.symbol.hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

pub struct FigiResolver {
    client: Client,
    api_key: Option<String>,
    semaphore: Arc<Semaphore>,
}

impl FigiResolver {
    pub fn new(client: Client, api_key: Option<String>, max_concurrent_batches: usize) -> Self {
        Self {
            client,
            api_key,
            semaphore: Arc::new(Semaphore::new(max_concurrent_batches)),
        }
    }

    /// Resolves an ordered slice of raw equities to identification
    /// matches. The output is exactly `equities.len()` long and
    /// `output[i]` corresponds to `equities[i]`; unresolved entries are
    /// `None`. Cache-through on the whole input: an identical ordered
    /// batch returns the cached result without touching the vendor.
    pub async fn resolve(&self, equities: &[RawEquity], cache: &CacheStore) -> Vec<Option<IdentificationMatch>> {
        let key = cache_key(equities);
        if let Ok(Some(cached)) = cache.load_cache_entry(CACHE_NAME, &key) {
            match serde_json::from_value::<Vec<Option<IdentificationMatch>>>(cached) {
                Ok(matches) if matches.len() == equities.len() => {
                    debug!(count = equities.len(), "identify cache hit");
                    return matches;
                }
                Ok(_) => debug!("identify cache entry length mismatch, ignoring"),
                Err(error) => debug!(%error, "failed to decode cached identify result"),
            }
        }

        let results = self.resolve_uncached(equities).await;

        let payload = serde_json::to_value(&results).unwrap_or(serde_json::Value::Null);
        if let Err(error) = cache.save_cache_entry(CACHE_NAME, &key, &payload) {
            debug!(%error, "failed to cache identify result");
        }

        results
    }

    async fn resolve_uncached(&self, equities: &[RawEquity]) -> Vec<Option<IdentificationMatch>> {
        let mut results = Vec::with_capacity(equities.len());
        let mut handles = Vec::new();

        for (batch_index, chunk) in equities.chunks(BATCH_SIZE).enumerate() {
            let queries: Vec<Option<MappingQuery>> = chunk.iter().map(build_query).collect();
            let client = self.client.clone();
            let api_key = self.api_key.clone();
            let semaphore = self.semaphore.clone();
            let chunk_len = chunk.len();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                match fetch_batch(&client, api_key.as_deref(), &queries).await {
                    Ok(matches) => matches,
                    Err(error) => {
                        warn!(batch = batch_index, %error, "FIGI batch failed, degrading to nulls");
                        vec![None; chunk_len]
                    }
                }
            }));
        }

        for handle in handles {
            let batch_results = handle.await.unwrap_or_default();
            results.extend(batch_results);
        }

        let resolved = results.iter().filter(|r| r.is_some()).count();
        info!(
            resolved,
            failed = results.len() - resolved,
            "identified raw equities"
        );

        results
    }
}

fn build_query(equity: &RawEquity) -> Option<MappingQuery> {
    if let Some(isin) = &equity.isin {
        return Some(MappingQuery {
            id_type: "ID_ISIN",
            id_value: isin.as_str().to_string(),
            market_sec_des: "Equity",
        });
    }
    if let Some(cusip) = &equity.cusip {
        return Some(MappingQuery {
            id_type: "ID_CUSIP",
            id_value: cusip.as_str().to_string(),
            market_sec_des: "Equity",
        });
    }
    Some(MappingQuery {
        id_type: "TICKER",
        id_value: equity.symbol.clone(),
        market_sec_des: "Equity",
    })
}

async fn fetch_batch(
    client: &Client,
    api_key: Option<&str>,
    queries: &[Option<MappingQuery>],
) -> Result<Vec<Option<IdentificationMatch>>> {
    let body: Vec<&MappingQuery> = queries.iter().flatten().collect();

    let response = crate::http::retry(crate::http::DEFAULT_MAX_RETRIES, || async {
        let mut request = client.post(OPENFIGI_URL).json(&body);
        if let Some(key) = api_key {
            request = request.header("X-OPENFIGI-APIKEY", key);
        }
        request.send().await
    })
    .await?;
    let rows: Vec<MappingResultRow> = response.json().await?;

    Ok(extract_matches(rows, queries.len()))
}

/// For each index in `0..batch_len`, keeps the first row (in response
/// order) whose `query_number` matches and whose FIGI validates; later
/// rows sharing that index are ignored, including rows with an invalid
/// or missing FIGI that arrive before a valid one for the same index.
fn extract_matches(rows: Vec<MappingResultRow>, batch_len: usize) -> Vec<Option<IdentificationMatch>> {
    let mut winners: std::collections::HashMap<usize, MappingResultRow> = std::collections::HashMap::new();
    for row in rows {
        if winners.contains_key(&row.query_number) {
            continue;
        }
        let is_valid_figi = as_non_empty_str(&row.share_class_figi)
            .map(|figi| Figi::parse(&figi).is_ok())
            .unwrap_or(false);
        if is_valid_figi {
            winners.insert(row.query_number, row);
        }
    }

    (0..batch_len)
        .map(|index| {
            winners.get(&index).and_then(|row| {
                let figi = as_non_empty_str(&row.share_class_figi).and_then(|raw| Figi::parse(&raw).ok())?;
                let name = as_non_empty_str(&row.name).or_else(|| as_non_empty_str(&row.security_name));
                let symbol = as_non_empty_str(&row.ticker);
                Some(IdentificationMatch { figi, name, symbol })
            })
        })
        .collect()
}
