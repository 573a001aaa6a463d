//! Tokenization and token-list similarity.

use regex_lite::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w]+").expect("static pattern is valid"));

/// Lowercase, turn every run of non-word characters into a space and split.
///
/// Word characters are ASCII letters, digits and `_`.
pub fn normalize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    NON_WORD
        .replace_all(&lowered, " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of the token sets plus `positional_bonus` for every
/// index holding the same token in both lists. Capped at 1.0.
pub fn similarity(a: &[String], b: &[String], positional_bonus: f64) -> f64 {
    let set_a: HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: HashSet<&str> = b.iter().map(String::as_str).collect();

    let union = set_a.union(&set_b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let jaccard = intersection as f64 / union as f64;

    let aligned = a.iter().zip(b).filter(|(x, y)| x == y).count();

    (jaccard + aligned as f64 * positional_bonus).min(1.0)
}
