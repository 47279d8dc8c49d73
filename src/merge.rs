//! Merges a group of raw equities that all resolved to the same
//! share-class FIGI into one canonical record.
//!
//! Every per-field reducer here is grounded in the original source's
//! `domain/_utils/_merge.py`: name by fuzzy single-link clustering,
//! symbol/isin/cusip/currency by modal value with first-occurrence
//! tie-break, mics by order-preserving union, and the two numeric
//! fields by median of the non-null values.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::fuzzy::token_set_ratio;
use crate::schemas::{Figi, RawEquity};

const NAME_CLUSTER_THRESHOLD: i64 = 90;

/// Merges a non-empty group of raw equities sharing one share-class
/// FIGI into a single `RawEquity`. Returns an error if the group is
/// empty or the FIGIs are not uniform. The merged record still passes
/// through enrichment and canonicalisation downstream, so this stops
/// short of building a `CanonicalEquity` itself.
pub fn merge(group: &[RawEquity]) -> Result<RawEquity, String> {
    let figi = validate_share_class_figi(group)?;

    let name = merge_name(group);
    let symbol = merge_modal(group.iter().map(|e| e.symbol.clone()));
    let isin = merge_modal_option(group.iter().map(|e| e.isin.clone()));
    let cusip = merge_modal_option(group.iter().map(|e| e.cusip.clone()));
    let currency = merge_modal_option(group.iter().map(|e| e.currency.clone()));
    let mics = merge_mics(group);
    let last_price = merge_median(group.iter().filter_map(|e| e.last_price));
    let market_cap = merge_median(group.iter().filter_map(|e| e.market_cap));

    Ok(RawEquity {
        name,
        symbol,
        isin,
        cusip,
        share_class_figi: Some(figi),
        mics,
        currency,
        last_price,
        market_cap,
    })
}

fn validate_share_class_figi(group: &[RawEquity]) -> Result<Figi, String> {
    let first = group
        .first()
        .ok_or_else(|| "cannot merge an empty group".to_string())?;
    let figi = first
        .share_class_figi
        .clone()
        .ok_or_else(|| "group's first record has no share-class FIGI".to_string())?;

    for equity in group {
        match &equity.share_class_figi {
            Some(other) if *other == figi => {}
            _ => return Err("group contains more than one distinct share-class FIGI".to_string()),
        }
    }
    Ok(figi)
}

/// Single-link clusters names by token-set ratio, weights each cluster
/// by the total occurrence count of its members, and returns the
/// earliest-occurring name (in group order) from the heaviest cluster.
fn merge_name(group: &[RawEquity]) -> String {
    let names: Vec<&str> = group.iter().map(|e| e.name.as_str()).collect();

    let mut clusters: Vec<Vec<&str>> = Vec::new();
    'outer: for &name in &names {
        for cluster in clusters.iter_mut() {
            if cluster
                .iter()
                .any(|member| token_set_ratio(member, name) >= NAME_CLUSTER_THRESHOLD)
            {
                cluster.push(name);
                continue 'outer;
            }
        }
        clusters.push(vec![name]);
    }

    let mut occurrence: HashMap<&str, usize> = HashMap::new();
    for &name in &names {
        *occurrence.entry(name).or_insert(0) += 1;
    }

    let heaviest = clusters
        .iter()
        .max_by_key(|cluster| cluster.iter().map(|n| occurrence[n]).sum::<usize>())
        .expect("group is non-empty, so at least one cluster exists");

    // earliest spelling in group order within the winning cluster
    names
        .iter()
        .find(|name| heaviest.contains(name))
        .map(|s| s.to_string())
        .unwrap_or_default()
}

/// Modal value with first-occurrence tie-break, over a non-optional
/// field (always present, e.g. symbol).
fn merge_modal(values: impl Iterator<Item = String>) -> String {
    let values: Vec<String> = values.collect();
    modal_pick(&values).unwrap_or_default()
}

/// Modal value with first-occurrence tie-break, over an optional field;
/// `None`s do not participate in the vote.
fn merge_modal_option<T: Clone + PartialEq>(values: impl Iterator<Item = Option<T>>) -> Option<T> {
    let values: Vec<T> = values.flatten().collect();
    modal_pick(&values)
}

fn modal_pick<T: Clone + PartialEq>(values: &[T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    // first_index[k] is where the k-th distinct value first appeared;
    // tally[k] is its total occurrence count.
    let mut first_index: Vec<usize> = Vec::new();
    let mut tally: Vec<usize> = Vec::new();
    for (i, value) in values.iter().enumerate() {
        if let Some(pos) = first_index.iter().position(|&idx| &values[idx] == value) {
            tally[pos] += 1;
        } else {
            first_index.push(i);
            tally.push(1);
        }
    }

    let (best_pos, _) = tally
        .iter()
        .enumerate()
        .max_by_key(|(_, &count)| count)
        .expect("non-empty");
    Some(values[first_index[best_pos]].clone())
}

fn merge_mics(group: &[RawEquity]) -> Option<Vec<crate::schemas::Mic>> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for equity in group {
        if let Some(mics) = &equity.mics {
            for mic in mics {
                if seen.insert(mic.clone()) {
                    result.push(mic.clone());
                }
            }
        }
    }
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

fn merge_median(values: impl Iterator<Item = Decimal>) -> Option<Decimal> {
    let mut values: Vec<Decimal> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / Decimal::from(2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{RawEquity, RawEquityInput};

    fn equity(name: &str, symbol: &str, figi: &str, price: Option<&str>) -> RawEquity {
        RawEquity::build(RawEquityInput {
            name,
            symbol,
            isin: None,
            cusip: None,
            share_class_figi: Some(figi),
            mics: vec![],
            currency: Some("USD"),
            last_price: price,
            market_cap: None,
        })
        .unwrap()
    }

    #[test]
    fn rejects_mixed_figis() {
        let group = vec![
            equity("Acme", "ACM", "BBG000000001", None),
            equity("Acme", "ACM", "BBG000000002", None),
        ];
        assert!(merge(&group).is_err());
    }

    #[test]
    fn symbol_uses_majority_with_first_seen_tiebreak() {
        let group = vec![
            equity("Acme Corp", "ACM", "BBG000000001", None),
            equity("Acme Corp", "ACME", "BBG000000001", None),
            equity("Acme Corp", "ACM", "BBG000000001", None),
        ];
        let merged = merge(&group).unwrap();
        assert_eq!(merged.symbol, "ACM");
    }

    #[test]
    fn numeric_fields_use_median() {
        let group = vec![
            equity("Acme Corp", "ACM", "BBG000000001", Some("10.00")),
            equity("Acme Corp", "ACM", "BBG000000001", Some("20.00")),
            equity("Acme Corp", "ACM", "BBG000000001", Some("30.00")),
        ];
        let merged = merge(&group).unwrap();
        assert_eq!(merged.last_price.unwrap(), Decimal::new(2000, 2));
    }

    #[test]
    fn names_cluster_regardless_of_token_order() {
        let group = vec![
            equity("Global Acme Holdings", "ACM", "BBG000000001", None),
            equity("Acme Holdings Global", "ACM", "BBG000000001", None),
            equity("Zeta Unrelated Co", "ACM", "BBG000000001", None),
        ];
        let merged = merge(&group).unwrap();
        assert_eq!(merged.name, "GLOBAL ACME HOLDINGS");
    }
}
