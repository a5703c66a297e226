//! Keyword extraction shared by the scorer and the resonance matcher.

use std::collections::BTreeSet;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "was", "were", "are", "has", "have",
    "had", "but", "not", "you", "your", "its", "into", "onto", "than", "then", "there", "their",
    "about", "been", "will", "would", "could", "should",
];

/// Lowercased alphanumeric words of at least three characters, minus stop words.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| w.to_lowercase())
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Fraction of `query` tokens that also appear in `target`. Zero for an empty query.
pub fn coverage(query: &BTreeSet<String>, target: &BTreeSet<String>) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let hits = query.iter().filter(|t| target.contains(*t)).count();
    hits as f64 / query.len() as f64
}
