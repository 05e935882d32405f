//! Text normalization shared by hypothesis matching, the rule filter,
//! deduplication and temporal fit scoring.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("token pattern is valid"))
}

/// Words too common to carry signal.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "have", "in", "is",
    "it", "its", "of", "on", "or", "our", "that", "the", "their", "this", "to", "was", "we",
    "will", "with",
];

/// Lowercases and splits text into alphanumeric tokens, dropping stopwords.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    token_re()
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOPWORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Returns the distinct tokens of `text`.
#[must_use]
pub fn token_set(text: &str) -> BTreeSet<String> {
    tokenize(text).into_iter().collect()
}

/// Jaccard similarity of the token sets of two texts, in [0, 1].
///
/// Two empty texts are identical.
#[must_use]
pub fn jaccard(a: &str, b: &str) -> f64 {
    let a = token_set(a);
    let b = token_set(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(&b).count();
    let union = a.union(&b).count();
    #[allow(clippy::cast_precision_loss)]
    let sim = intersection as f64 / union as f64;
    sim
}

/// Returns true if `keyword` occurs in `tokens`.
///
/// Multi-word keywords ("mobile app") match when their tokens appear
/// consecutively.
#[must_use]
pub fn contains_keyword(tokens: &[String], keyword: &str) -> bool {
    let needle = tokenize(keyword);
    if needle.is_empty() {
        return false;
    }
    tokens
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(t, n)| t == n))
}

/// Counts how many of `keywords` occur in `text`.
#[must_use]
pub fn keyword_hits<'a>(text: &str, keywords: impl IntoIterator<Item = &'a String>) -> usize {
    let tokens = tokenize(text);
    keywords
        .into_iter()
        .filter(|k| contains_keyword(&tokens, k))
        .count()
}

/// Extracts the first sentence of `text`, bounded to `max_chars` characters.
#[must_use]
pub fn first_sentence(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    let end = trimmed
        .char_indices()
        .find(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map_or(trimmed.len(), |(i, _)| i);
    truncate_chars(trimmed[..end].trim(), max_chars)
}

/// Truncates to at most `max_chars` characters on a char boundary.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
