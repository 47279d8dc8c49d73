//! Fuzzy string matching primitives used by the merger's name clustering
//! and the enrichment vendor's symbol selection.
//!
//! The corpus has no rapidfuzz equivalent, so the two scores this crate
//! actually needs — a token-set ratio and a combined symbol/name ratio —
//! are built on top of `strsim`'s Levenshtein primitives rather than
//! hand-rolling a full edit-distance implementation.

use std::collections::BTreeSet;

/// Normalised Levenshtein similarity in the 0-100 range, matching
/// `rapidfuzz.fuzz.ratio`'s scale.
pub fn ratio(a: &str, b: &str) -> i64 {
    if a.is_empty() && b.is_empty() {
        return 100;
    }
    let distance = strsim::levenshtein(a, b) as f64;
    let longest = a.chars().count().max(b.chars().count()) as f64;
    if longest == 0.0 {
        return 100;
    }
    (((longest - distance) / longest) * 100.0).round() as i64
}

/// Token-set ratio: tokenises both strings, compares the intersection
/// against each side's remainder, and returns the best of the three
/// comparisons — the same strategy rapidfuzz's `token_set_ratio` uses to
/// avoid penalising strings that share all their words but in a
/// different order or with extra duplicated tokens.
pub fn token_set_ratio(a: &str, b: &str) -> i64 {
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let intersection: BTreeSet<&str> = tokens_a.intersection(&tokens_b).copied().collect();

    let sorted_join = |tokens: &BTreeSet<&str>| tokens.iter().copied().collect::<Vec<_>>().join(" ");

    let intersection_str = sorted_join(&intersection);
    let diff_a = sorted_join(&tokens_a.difference(&tokens_b).copied().collect());
    let diff_b = sorted_join(&tokens_b.difference(&tokens_a).copied().collect());

    let combined_a = if diff_a.is_empty() {
        intersection_str.clone()
    } else if intersection_str.is_empty() {
        diff_a.clone()
    } else {
        format!("{intersection_str} {diff_a}")
    };
    let combined_b = if diff_b.is_empty() {
        intersection_str.clone()
    } else if intersection_str.is_empty() {
        diff_b.clone()
    } else {
        format!("{intersection_str} {diff_b}")
    };

    ratio(&intersection_str, &combined_a)
        .max(ratio(&intersection_str, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

/// Token-sorted ratio: both strings' tokens are sorted before comparing,
/// so word order doesn't affect the score.
pub fn token_sort_ratio(a: &str, b: &str) -> i64 {
    let sort = |s: &str| {
        let mut tokens: Vec<&str> = s.split_whitespace().collect();
        tokens.sort_unstable();
        tokens.join(" ")
    };
    ratio(&sort(a), &sort(b))
}

/// Combined score used to rank enrichment-vendor candidate quotes:
/// symbol similarity plus token-sorted name similarity, mirroring the
/// `WRatio`-based scoring this was adapted from.
pub fn weighted_ratio(candidate_symbol: &str, expected_symbol: &str, candidate_name: &str, expected_name: &str) -> i64 {
    ratio(candidate_symbol, expected_symbol) + token_sort_ratio(candidate_name, expected_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_100() {
        assert_eq!(ratio("ACME INC", "ACME INC"), 100);
        assert_eq!(token_set_ratio("ACME INC", "ACME INC"), 100);
    }

    #[test]
    fn token_set_ignores_word_order() {
        let score = token_set_ratio("GLOBAL ACME CORP", "ACME CORP GLOBAL");
        assert_eq!(score, 100);
    }

    #[test]
    fn dissimilar_strings_score_low() {
        assert!(ratio("ACME INC", "ZYX HOLDINGS") < 50);
    }
}
