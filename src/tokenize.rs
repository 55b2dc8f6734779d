//! Tokenizer and per-field vocabulary.
//!
//! Normalization: Unicode lowercasing, split on any run of non-alphanumeric
//! bytes, drop tokens that are empty, are stopwords, or exceed
//! [`MAX_TERM_LEN`] bytes. Document length is the number of tokens that
//! survive filtering.

use std::collections::HashSet;

/// Terms longer than this are dropped rather than indexed.
pub const MAX_TERM_LEN: usize = 64;

/// Bundled English stopword list (newline-delimited, lowercased).
const ENGLISH_STOPWORDS: &str = include_str!("stopwords_en.txt");

/// Stopword configuration: either the bundled English list or a caller-supplied set.
#[derive(Debug, Clone, Default)]
pub enum Stopwords {
    /// No stopword filtering.
    #[default]
    None,
    /// The bundled English list.
    English,
    /// A caller-provided set of lowercased stopwords.
    Custom(HashSet<String>),
}

impl Stopwords {
    fn as_set(&self) -> Option<HashSet<&str>> {
        match self {
            Stopwords::None => None,
            Stopwords::English => Some(
                ENGLISH_STOPWORDS
                    .lines()
                    .filter(|l| !l.is_empty())
                    .collect(),
            ),
            Stopwords::Custom(set) => Some(set.iter().map(|s| s.as_str()).collect()),
        }
    }
}

/// Stateless tokenizer: given a stopword set, splits and filters text.
///
/// The same tokenizer is used for both indexing and querying a field, so
/// vocabularies built at index time stay reachable from query terms.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stopwords: HashSet<String>,
}

impl Tokenizer {
    /// Build a tokenizer from a stopword configuration.
    pub fn new(stopwords: &Stopwords) -> Self {
        let stopwords = stopwords
            .as_set()
            .map(|set| set.into_iter().map(str::to_string).collect())
            .unwrap_or_default();
        Self { stopwords }
    }

    /// Tokenize `text`, returning the surviving terms in order.
    ///
    /// Document length (token count) is `result.len()` after this call.
    pub fn tokenize(&self, text: &str) -> Vec<Box<str>> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|tok| !tok.is_empty() && tok.len() <= MAX_TERM_LEN)
            .filter(|tok| !self.stopwords.contains(*tok))
            .map(|tok| tok.to_string().into_boxed_str())
            .collect()
    }
}
