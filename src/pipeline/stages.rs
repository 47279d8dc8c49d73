//! The individual pipeline stage implementations. Each stage takes the
//! previous stage's output and either forwards a transformed record or
//! drops it with a logged reason — nothing panics its way out of a
//! single bad record. `convert` is the one exception: an FX failure is
//! a data error for the whole run, not a single record, so it aborts
//! the pipeline instead of dropping the offending equity.

use std::collections::HashMap;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::cache::CacheStore;
use crate::enrichment::EnrichmentSession;
use crate::error::Result;
use crate::fx::UsdConverter;
use crate::identify::FigiResolver;
use crate::merge;
use crate::schemas::{CanonicalEquity, EquityFinancials, EquityIdentity, FeedRecord, RawEquity};

/// Parses every feed record into a `RawEquity`, dropping (and logging)
/// any record that fails validation.
pub fn parse(records: Vec<FeedRecord>) -> Vec<RawEquity> {
    let mut parsed = Vec::with_capacity(records.len());
    let mut failed = 0;
    for record in records {
        match record.parse() {
            Ok(equity) => parsed.push(equity),
            Err(error) => {
                failed += 1;
                debug!(%error, "dropped feed record during parse");
            }
        }
    }
    if failed > 0 {
        warn!(failed, "some feed records failed to parse");
    }
    parsed
}

/// Converts every equity's monetary fields to USD using the given
/// converter. An equity with no currency is passed through unchanged.
/// A currency absent from the rate table, or present with a zero rate,
/// is a fatal data error: unlike every other stage, this one aborts the
/// whole run rather than dropping the offending record.
pub fn convert(equities: Vec<RawEquity>, converter: &UsdConverter) -> Result<Vec<RawEquity>> {
    let mut converted = Vec::with_capacity(equities.len());
    for mut equity in equities {
        let currency = match &equity.currency {
            Some(currency) => currency.as_str().to_string(),
            None => {
                converted.push(equity);
                continue;
            }
        };

        if let Some(price) = equity.last_price {
            equity.last_price = Some(converter.convert(price, &currency)?);
        }
        if let Some(market_cap) = equity.market_cap {
            equity.market_cap = Some(converter.convert(market_cap, &currency)?);
        }
        converted.push(equity);
    }
    Ok(converted)
}

/// Resolves every equity to its share-class FIGI. The resolver is
/// batch-oriented, so the whole stream is materialised first; output
/// order matches input order, and unmapped equities are dropped.
pub async fn identify(equities: Vec<RawEquity>, resolver: &FigiResolver, cache: &CacheStore) -> Vec<RawEquity> {
    let matches = resolver.resolve(&equities, cache).await;

    equities
        .into_iter()
        .zip(matches)
        .filter_map(|(equity, matched)| {
            matched.map(|m| equity.with_identification(m.figi, m.name.as_deref(), m.symbol.as_deref()))
        })
        .collect()
}

/// Groups identified equities by share-class FIGI, preserving
/// first-seen group order, then reduces each group to one `RawEquity`
/// via the Merger, dropping (and logging) any group that fails to
/// merge.
pub fn deduplicate(equities: Vec<RawEquity>) -> Vec<RawEquity> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<RawEquity>> = HashMap::new();

    for equity in equities {
        let Some(figi) = equity.share_class_figi.clone() else {
            continue;
        };
        let key = figi.as_str().to_string();
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(equity);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(|group| match merge::merge(&group) {
            Ok(merged) => Some(merged),
            Err(error) => {
                warn!(%error, "dropped group during merge");
                None
            }
        })
        .collect()
}

/// Enriches each deduplicated equity from the supplementary vendor,
/// filling in only the fields that are still missing; enrichment
/// failures are per-record, not fatal, and yield the un-enriched record
/// unchanged. Unlike every other stage this one is explicitly unordered:
/// equities are enriched concurrently and the result order reflects
/// completion order, not input order.
pub async fn enrich(equities: Vec<RawEquity>, session: &EnrichmentSession, cache: &CacheStore) -> Vec<RawEquity> {
    let tasks = equities.into_iter().map(|equity| async move {
        if !equity.has_missing_fields() {
            return equity;
        }

        match tokio::time::timeout(std::time::Duration::from_secs(10), session.enrich(&equity, cache)).await {
            Ok(Ok(enriched)) => equity.with_enrichment(&enriched),
            Ok(Err(error)) => {
                debug!(%error, symbol = %equity.symbol, "enrichment lookup failed");
                equity
            }
            Err(_) => {
                warn!(symbol = %equity.symbol, "enrichment lookup timed out");
                equity
            }
        }
    });

    stream::iter(tasks).buffer_unordered(16).collect().await
}

/// Converts each already-merged, already-enriched equity with a
/// share-class FIGI into a `CanonicalEquity`, dropping (and logging)
/// any that still lack one.
pub fn canonicalise(equities: Vec<RawEquity>) -> Vec<CanonicalEquity> {
    let mut canonical = Vec::with_capacity(equities.len());
    for equity in equities {
        match equity.share_class_figi.clone() {
            Some(figi) => canonical.push(CanonicalEquity {
                identity: EquityIdentity {
                    name: equity.name,
                    symbol: equity.symbol,
                    share_class_figi: figi,
                    isin: equity.isin,
                    cusip: equity.cusip,
                },
                financials: EquityFinancials {
                    mics: equity.mics,
                    currency: equity.currency,
                    last_price: equity.last_price,
                    market_cap: equity.market_cap,
                },
            }),
            None => warn!(symbol = %equity.symbol, "dropped equity with no share-class FIGI at canonicalisation"),
        }
    }
    canonical
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::UsdConverter;
    use crate::schemas::{FeedKind, Figi, RawEquityInput};

    fn equity(symbol: &str, figi: Option<&str>, last_price: &str) -> RawEquity {
        RawEquity::build(RawEquityInput {
            name: "Example Corp",
            symbol,
            isin: None,
            cusip: None,
            share_class_figi: figi,
            mics: vec!["XLON".to_string()],
            currency: Some("GBP"),
            last_price: Some(last_price),
            market_cap: None,
        })
        .unwrap()
    }

    #[test]
    fn parse_drops_records_that_fail_validation() {
        let valid = FeedRecord {
            feed: FeedKind::Euronext,
            raw_data: serde_json::json!({
                "name": "Example Corp",
                "symbol": "EXC",
                "isin": "",
                "mics": [],
                "currency": "",
                "last_price": "",
            }),
        };
        let invalid = FeedRecord {
            feed: FeedKind::Euronext,
            raw_data: serde_json::json!({"name": "", "symbol": ""}),
        };

        let parsed = parse(vec![valid, invalid]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].symbol, "EXC");
    }

    #[test]
    fn convert_converts_every_equity_sharing_a_known_currency() {
        let mut rates = std::collections::HashMap::new();
        rates.insert("GBP".to_string(), rust_decimal::Decimal::new(79, 2));
        let converter = UsdConverter::from_rates(rates);

        let known = equity("KNOWN", None, "79.00");

        let converted = convert(vec![known], &converter).unwrap();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].symbol, "KNOWN");
        assert_eq!(converted[0].last_price.unwrap().to_string(), "100.00");
    }

    #[test]
    fn convert_fails_fatally_on_an_unknown_currency() {
        let mut rates = std::collections::HashMap::new();
        rates.insert("GBP".to_string(), rust_decimal::Decimal::new(79, 2));
        let converter = UsdConverter::from_rates(rates);

        let mut unknown = equity("UNKNOWN", None, "10.00");
        unknown.currency = crate::schemas::Currency::parse("CHF").ok();

        assert!(convert(vec![unknown], &converter).is_err());
    }

    #[test]
    fn convert_fails_fatally_on_a_zero_rate() {
        let mut rates = std::collections::HashMap::new();
        rates.insert("GBP".to_string(), rust_decimal::Decimal::ZERO);
        let converter = UsdConverter::from_rates(rates);

        let zero_rate = equity("ZERORATE", None, "10.00");

        assert!(convert(vec![zero_rate], &converter).is_err());
    }

    #[test]
    fn deduplicate_merges_each_figi_group_into_one_record() {
        let a = equity("AAA", Some("BBG000000001"), "10");
        let b = equity("AAA", Some("BBG000000001"), "20");
        let c = equity("CCC", Some("BBG000000002"), "5");
        let no_figi = equity("NOFIGI", None, "1");

        let deduplicated = deduplicate(vec![a, b, c, no_figi]);

        assert_eq!(deduplicated.len(), 2);
        assert_eq!(deduplicated[0].share_class_figi.as_ref().unwrap().as_str(), "BBG000000001");
        assert_eq!(deduplicated[1].share_class_figi.as_ref().unwrap().as_str(), "BBG000000002");
    }

    #[test]
    fn canonicalise_drops_equities_with_no_figi_and_copies_the_rest() {
        let with_figi = equity("HASFIGI", Some("BBG000000003"), "1");
        let without_figi = equity("NOFIGI", None, "1");

        let canonical = canonicalise(vec![with_figi, without_figi]);

        assert_eq!(canonical.len(), 1);
        assert_eq!(canonical[0].identity.symbol, "HASFIGI");
        assert_eq!(canonical[0].identity.share_class_figi, Figi::parse("BBG000000003").unwrap());
    }
}
