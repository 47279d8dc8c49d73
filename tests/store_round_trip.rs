//! End-to-end exercise of the on-disk store and the merge/identify
//! contracts without touching the network: build raw equities by hand,
//! run them through deduplicate + merge, persist the result, then
//! export and rebuild from the gzip artifact.

use equity_aggregator::cache::CacheStore;
use equity_aggregator::merge::merge;
use equity_aggregator::schemas::{CanonicalEquity, EquityFinancials, EquityIdentity, RawEquity, RawEquityInput};

/// Mirrors the pipeline's `canonicalise` stage: a merged `RawEquity` is
/// guaranteed a share-class FIGI, so this is a straight field copy.
fn canonicalise(equity: RawEquity) -> CanonicalEquity {
    let figi = equity.share_class_figi.clone().expect("merged equity carries a FIGI");
    CanonicalEquity {
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
    }
}

fn equity(
    name: &str,
    symbol: &str,
    figi: &str,
    isin: Option<&str>,
    last_price: Option<&str>,
) -> RawEquity {
    RawEquity::build(RawEquityInput {
        name,
        symbol,
        isin,
        cusip: None,
        share_class_figi: Some(figi),
        mics: vec!["XNAS".to_string()],
        currency: Some("USD"),
        last_price,
        market_cap: None,
    })
    .unwrap()
}

#[tokio::test]
async fn merged_group_persists_and_round_trips_through_export() {
    let group = vec![
        equity("Acme Corp", "ACM", "BBG000000001", Some("US0000000001"), Some("10.00")),
        equity("Acme Corp", "ACM", "BBG000000001", Some("US0000000001"), Some("12.00")),
        equity("Acme Corp", "ACME", "BBG000000001", Some("US0000000001"), Some("11.00")),
    ];

    let merged = merge(&group).expect("uniform group merges");
    assert_eq!(merged.symbol, "ACM");
    assert_eq!(merged.last_price.unwrap().to_string(), "11.00");
    let canonical = canonicalise(merged);

    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path().join("store.db"), 1440).unwrap();
    store.save_canonical_equities(&[canonical.clone()]).await.unwrap();

    let export_path = dir.path().join("export.jsonl.gz");
    let exported = store.export(&export_path).await.unwrap();
    assert_eq!(exported, 1);

    let rebuilt_store = CacheStore::open(dir.path().join("rebuilt.db"), 1440).unwrap();
    rebuilt_store.rebuild_from_export(&export_path).await.unwrap();

    let loaded = rebuilt_store
        .load_canonical_equity("BBG000000001")
        .unwrap()
        .expect("equity survives export/rebuild round trip");
    assert_eq!(loaded, canonical);
}

#[test]
fn mixed_figi_group_is_rejected() {
    let group = vec![
        equity("Acme Corp", "ACM", "BBG000000001", None, None),
        equity("Acme Corp", "ACM", "BBG000000002", None, None),
    ];
    assert!(merge(&group).is_err());
}
