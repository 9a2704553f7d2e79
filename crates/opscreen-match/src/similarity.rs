// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

fn combined(intersection: &str, difference: &[&str]) -> String {
    if difference.is_empty() {
        intersection.to_string()
    } else if intersection.is_empty() {
        difference.join(" ")
    } else {
        format!("{intersection} {}", difference.join(" "))
    }
}

fn ratio(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    normalized_levenshtein(a, b)
}

/// Token-set similarity in `[0, 100]` over two already-normalized names.
///
/// Tokens common to both sides are factored out, then the three combined
/// strings (shared, shared+left-only, shared+right-only) are compared
/// pairwise and the best ratio wins. A name that is a token subset of the
/// other therefore scores 100 regardless of word order.
#[must_use]
pub fn token_set_ratio(a: &str, b: &str) -> u8 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0;
    }
    let tokens_a: BTreeSet<&str> = a.split_whitespace().collect();
    let tokens_b: BTreeSet<&str> = b.split_whitespace().collect();

    let shared = tokens_a
        .intersection(&tokens_b)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    let only_a: Vec<&str> = tokens_a.difference(&tokens_b).copied().collect();
    let only_b: Vec<&str> = tokens_b.difference(&tokens_a).copied().collect();

    let left = combined(&shared, &only_a);
    let right = combined(&shared, &only_b);

    let best = [
        ratio(&shared, &left),
        ratio(&shared, &right),
        ratio(&left, &right),
    ]
    .into_iter()
    .fold(0.0_f64, f64::max);

    (best * 100.0).round().clamp(0.0, 100.0) as u8
}
