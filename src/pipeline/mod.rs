//! The six-stage pipeline: parse, convert, identify, deduplicate,
//! enrich, canonicalise — composed in this fixed order by [`run`].
//!
//! Grounded in the original source's `domain/pipeline/{runner,resolve}.py`
//! and `transforms/*.py`.

mod stages;

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::enrichment::EnrichmentSession;
use crate::error::Result;
use crate::feeds;
use crate::fx::UsdConverter;
use crate::identify::FigiResolver;
use crate::schemas::{CanonicalEquity, FeedRecord};

/// Runs the full pipeline end to end: fetches every authoritative feed,
/// normalises and resolves each listing, merges duplicates, enriches
/// from the supplementary vendor, and persists the resulting canonical
/// equities. Returns the canonical equities written.
pub async fn aggregate_equity_profiles(
    config: &Config,
    client: &Client,
    cache: &CacheStore,
) -> Result<Vec<CanonicalEquity>> {
    let records = resolve_feeds(config, client, cache).await;
    info!(count = records.len(), "resolved raw feed records");

    let raw_equities = stages::parse(records);
    info!(count = raw_equities.len(), "parsed raw equities");

    let converter = UsdConverter::load(client, cache, &config.exchange_rate_api_key).await?;
    let converted = stages::convert(raw_equities, &converter)?;

    let resolver = FigiResolver::new(
        client.clone(),
        config.openfigi_api_key.clone(),
        config.limits.figi_batch,
    );
    let identified = stages::identify(converted, &resolver, cache).await;
    info!(count = identified.len(), "identified raw equities");

    let deduplicated = stages::deduplicate(identified);
    info!(count = deduplicated.len(), "deduplicated into merged equities");

    let session = EnrichmentSession::new(
        client.clone(),
        crate::enrichment::EnrichmentConfig {
            min_score: config.enrichment_min_score,
            ..Default::default()
        },
        config.limits.enrichment_stream,
        converter.clone(),
    );
    let enriched = stages::enrich(deduplicated, &session, cache).await;

    let canonical = stages::canonicalise(enriched);
    info!(count = canonical.len(), "canonicalised merged equities");

    cache.save_canonical_equities(&canonical).await?;

    Ok(canonical)
}

/// Launches one task per authoritative feed and collects every record
/// that completes within its timeout; a feed that times out or fails is
/// logged and, per `fatal_on_feed_error`, either aborts the process or
/// is skipped so the remaining feeds still contribute.
async fn resolve_feeds(config: &Config, client: &Client, cache: &CacheStore) -> Vec<FeedRecord> {
    let timeout = Duration::from_secs(10);

    let euronext = safe_fetch(
        "euronext",
        timeout,
        feeds::fetch_euronext_records(client, cache, config.limits.feed_page_fetch, config.fatal_on_feed_error),
    );
    let lse = safe_fetch(
        "lse",
        timeout,
        feeds::fetch_lse_records(client, cache, config.limits.feed_page_fetch, config.fatal_on_feed_error),
    );
    let xetra = safe_fetch(
        "xetra",
        timeout,
        feeds::fetch_xetra_records(client, cache, config.limits.feed_page_fetch, config.fatal_on_feed_error),
    );

    let (euronext, lse, xetra) = tokio::join!(euronext, lse, xetra);

    let mut all = Vec::new();
    all.extend(euronext);
    all.extend(lse);
    all.extend(xetra);
    all
}

async fn safe_fetch(
    feed: &'static str,
    timeout: Duration,
    fut: impl std::future::Future<Output = Result<Vec<FeedRecord>>>,
) -> Vec<FeedRecord> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(records)) => records,
        Ok(Err(error)) => {
            warn!(feed, %error, "feed failed");
            Vec::new()
        }
        Err(_) => {
            error!(feed, "feed timed out");
            Vec::new()
        }
    }
}

/// Re-exported for callers that only need the FX rate table shape, not
/// the whole pipeline (e.g. the `seed` CLI subcommand's dry run).
pub type RateTable = HashMap<String, rust_decimal::Decimal>;
