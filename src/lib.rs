//! In-memory full-text search over tabular corpora, ranked by Okapi BM25.
//!
//! rankdex indexes CSV or newline-delimited JSON records once, then serves
//! many multi-field queries at interactive latency. The index is
//! partitioned by document id for parallel build and query, with a
//! Bloom-filter fast path that prunes rare-term lookups without decoding
//! postings, and a WAND-pruned top-k scorer.
//!
//! # Quick start
//!
//! ```
//! use rankdex::prelude::*;
//!
//! let options = BuildOptions {
//!     fields: vec!["title".to_string()],
//!     ..Default::default()
//! };
//! let mut engine = Bm25Engine::new(options).unwrap();
//! engine
//!     .index_documents([
//!         [("title".to_string(), "hello world".to_string())].into_iter().collect(),
//!         [("title".to_string(), "goodbye world".to_string())].into_iter().collect(),
//!     ])
//!     .unwrap();
//!
//! let (scores, doc_ids) = engine
//!     .get_topk_indices(Query::Broadcast("hello".to_string()), 10, None)
//!     .unwrap();
//! assert_eq!(doc_ids, vec![0]);
//! assert!(!scores.is_empty());
//! ```
//!
//! # Design
//!
//! - **Build once, query many.** There is no incremental update path; a
//!   frozen index is read-only and safe to share across threads.
//! - **Partitioned by doc-id.** `num_partitions` shards the corpus for
//!   parallel build and query; `save`/`load` round-trip the sharded state
//!   bit-for-bit.
//! - **No phrase queries.** Term positions aren't stored; ranking is
//!   bag-of-words BM25 over one or more fields.
//!
//! **Boundaries:**
//! - Indexing, scoring, persistence, the query façade.
//! - Does not parse arbitrary CSV/JSON schemas beyond one column's bytes
//!   per field, does not stem or lemmatize, does not do approximate
//!   nearest-neighbor search.

/// Per-partition Bloom filter over rare terms.
pub mod bloom;

/// Build-time configuration (`BuildOptions`, BM25 parameters, stopwords).
pub mod config;

/// Public query façade (`Bm25Engine`): the Building/Frozen state machine.
pub mod engine;

/// Error types for rankdex.
pub mod error;

/// Partitioned inverted index: mutable builder and frozen, queryable form.
pub mod index;

/// On-disk serialization (`save`/`load`).
pub mod persistence;

/// Multi-field query representation and per-field boosts.
pub mod query;

/// BM25 top-k scoring with WAND-style pruning.
pub mod scorer;

/// CSV and JSON-lines corpus readers.
pub mod source;

/// Tokenizer and per-field vocabulary.
pub mod tokenize;

/// Variable-byte codec for posting lists.
pub mod vbyte;

pub use error::Error;

/// Re-export of the types most callers need.
pub mod prelude {
    pub use crate::config::BuildOptions;
    pub use crate::engine::Bm25Engine;
    pub use crate::error::{Error, Result};
    pub use crate::query::{BoostFactors, Query};
    pub use crate::source::Document;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn scenario_two_field_boosted_query_ranks_as_spec_describes() {
        let options = BuildOptions {
            fields: vec!["title".to_string(), "artist".to_string()],
            ..Default::default()
        };
        let mut engine = Bm25Engine::new(options).unwrap();
        let rows: Vec<Document> = vec![
            [
                ("title".to_string(), "the wall".to_string()),
                ("artist".to_string(), "pink floyd".to_string()),
            ]
            .into_iter()
            .collect(),
            [
                ("title".to_string(), "pink moon".to_string()),
                ("artist".to_string(), "nick drake".to_string()),
            ]
            .into_iter()
            .collect(),
            [
                ("title".to_string(), "the bends".to_string()),
                ("artist".to_string(), "radiohead".to_string()),
            ]
            .into_iter()
            .collect(),
        ];
        engine.index_documents(rows).unwrap();

        let mut query = std::collections::HashMap::new();
        query.insert("title".to_string(), "the".to_string());
        query.insert("artist".to_string(), "pink".to_string());
        let boosts = BoostFactors::new([("title".to_string(), 1.0), ("artist".to_string(), 2.0)]);

        let docs = engine
            .get_topk_docs(Query::Named(query), 3, boosts, None)
            .unwrap();
        let ids: Vec<&str> = docs
            .iter()
            .map(|d| d.get("title").unwrap().as_str())
            .collect();
        // "pink moon" / "nick drake" matches neither "the" (title) nor
        // "pink" (artist), so only the two genuine matches are returned.
        assert_eq!(ids, vec!["the wall", "the bends"]);
    }
}
