//! Build-time configuration for a [`crate::engine::Bm25Engine`].

use crate::error::{Error, Result};
use crate::tokenize::Stopwords;

/// Okapi BM25 free parameters plus indexing-time knobs.
///
/// Defaults (`k1 = 1.5`, `b = 0.75`) match the values used throughout the
/// information-retrieval literature and are left untouched unless the
/// caller has a specific reason to retune them.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Fields to index, in declaration order. Field indices used elsewhere
    /// (`field_idx`) refer to positions in this list.
    pub fields: Vec<String>,

    /// Term saturation parameter. Higher values let repeated terms within a
    /// document keep contributing score for longer.
    pub k1: f64,

    /// Length normalization strength, in `[0, 1]`. `0` disables length
    /// normalization entirely; `1` applies it fully.
    pub b: f64,

    /// Number of partitions the corpus is sharded into by `doc_id % n`.
    pub num_partitions: usize,

    /// Terms posted in fewer than this many documents (corpus-wide) are
    /// dropped entirely.
    pub min_df: usize,

    /// Terms posted in more than this many documents (corpus-wide) are
    /// dropped entirely. `None` disables the upper bound.
    pub max_df: Option<usize>,

    /// Target false-positive rate for per-partition Bloom filters.
    pub bloom_fpr: f64,

    /// Only terms with a partition-local document frequency at or below
    /// this threshold get a Bloom filter entry; terms above it are common
    /// enough that the filter wouldn't save scoring work. `None` means
    /// every retained term gets a filter entry.
    pub bloom_df_threshold: Option<usize>,

    /// Stopword policy applied identically at index time and query time.
    pub stopwords: Stopwords,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            fields: Vec::new(),
            k1: 1.5,
            b: 0.75,
            num_partitions: 1,
            min_df: 1,
            max_df: None,
            bloom_fpr: 0.01,
            bloom_df_threshold: None,
            stopwords: Stopwords::None,
        }
    }
}

impl BuildOptions {
    /// Validate field values, returning [`Error::Config`] on the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::Config(
                "at least one field must be configured".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            if field.is_empty() {
                return Err(Error::Config("field names must be non-empty".to_string()));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::Config(format!("duplicate field name: {field}")));
            }
        }
        if self.num_partitions == 0 {
            return Err(Error::Config(
                "num_partitions must be at least 1".to_string(),
            ));
        }
        if self.k1 < 0.0 {
            return Err(Error::Config("k1 must be non-negative".to_string()));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(Error::Config("b must be in [0, 1]".to_string()));
        }
        if let Some(max_df) = self.max_df {
            if max_df < self.min_df {
                return Err(Error::Config(format!(
                    "max_df ({max_df}) must be >= min_df ({})",
                    self.min_df
                )));
            }
        }
        if !(self.bloom_fpr > 0.0 && self.bloom_fpr < 1.0) {
            return Err(Error::Config("bloom_fpr must be in (0, 1)".to_string()));
        }
        Ok(())
    }

    /// Index of `field` in [`Self::fields`], if configured.
    pub fn field_index(&self, field: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == field)
    }
}
