//! Public query façade: the Building/Frozen state machine wrapping an
//! [`IndexBuilder`]/[`FrozenIndex`] pair.

use std::path::Path;

use crate::config::BuildOptions;
use crate::error::{Error, Result};
use crate::index::{FrozenIndex, IndexBuilder};
use crate::persistence;
use crate::query::{BoostFactors, Query};
use crate::scorer;
use crate::source::Document;
use crate::tokenize::Tokenizer;

enum State {
    Building(IndexBuilder),
    Frozen(FrozenIndex),
}

/// An in-memory BM25 search engine over a tabular corpus.
///
/// Moves once, irreversibly, from `Building` (accepting documents) to
/// `Frozen` (read-only, queryable) the first time a query or `save` is
/// issued. There is no path back to `Building`.
pub struct Bm25Engine {
    state: State,
    tokenizer: Tokenizer,
}

impl Bm25Engine {
    /// Construct an empty, building engine from validated options.
    pub fn new(options: BuildOptions) -> Result<Self> {
        options.validate()?;
        let tokenizer = Tokenizer::new(&options.stopwords);
        let builder = IndexBuilder::new(options)?;
        Ok(Self {
            state: State::Building(builder),
            tokenizer,
        })
    }

    fn builder_mut(&mut self) -> Result<&mut IndexBuilder> {
        match &mut self.state {
            State::Building(b) => Ok(b),
            State::Frozen(_) => Err(Error::State(
                "cannot index more documents after the engine has been queried or saved"
                    .to_string(),
            )),
        }
    }

    /// Stream a CSV or JSON-lines file into the index. See
    /// [`crate::index::IndexBuilder::index_file`].
    pub fn index_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        self.builder_mut()?.index_file(path)
    }

    /// Index an in-memory ordered sequence of records.
    pub fn index_documents(
        &mut self,
        documents: impl IntoIterator<Item = Document>,
    ) -> Result<usize> {
        self.builder_mut()?.index_documents(documents)
    }

    /// Number of documents indexed so far (valid in either state).
    pub fn num_docs(&self) -> u64 {
        match &self.state {
            State::Building(b) => b.num_docs(),
            State::Frozen(f) => f.num_docs,
        }
    }

    /// Freeze the builder if it hasn't been already, returning the
    /// read-only index. Idempotent: queries after the first call reuse the
    /// same frozen state.
    fn ensure_frozen(&mut self) -> Result<&FrozenIndex> {
        if let State::Building(_) = &self.state {
            let State::Building(builder) = std::mem::replace(
                &mut self.state,
                State::Frozen(FrozenIndex {
                    options: BuildOptions::default(),
                    num_docs: 0,
                    fields: Vec::new(),
                    doc_origins: Vec::new(),
                    sources: Vec::new(),
                    memory_blob: Vec::new(),
                }),
            ) else {
                unreachable!()
            };
            let frozen = builder.freeze()?;
            self.state = State::Frozen(frozen);
        }
        match &self.state {
            State::Frozen(f) => Ok(f),
            State::Building(_) => unreachable!(),
        }
    }

    /// Top-k scores and doc-ids, descending score, ties broken by
    /// ascending doc-id. Finalizes the engine if it hasn't been already.
    pub fn get_topk_indices(
        &mut self,
        query: Query,
        k: usize,
        query_max_df: Option<usize>,
    ) -> Result<(Vec<f64>, Vec<u64>)> {
        let tokenizer = self.tokenizer.clone();
        let frozen = self.ensure_frozen()?;
        let results = scorer::topk(
            frozen,
            &query,
            k,
            &BoostFactors::default(),
            query_max_df,
            &tokenizer,
        )?;
        Ok(results.into_iter().unzip())
    }

    /// Top-k materialized rows, each augmented with a synthetic `score`
    /// column. Finalizes the engine if it hasn't been already.
    pub fn get_topk_docs(
        &mut self,
        query: Query,
        k: usize,
        boosts: BoostFactors,
        query_max_df: Option<usize>,
    ) -> Result<Vec<Document>> {
        let tokenizer = self.tokenizer.clone();
        let frozen = self.ensure_frozen()?;
        let results = scorer::topk(frozen, &query, k, &boosts, query_max_df, &tokenizer)?;
        let mut docs = Vec::with_capacity(results.len());
        for (score, doc_id) in results {
            let mut row = frozen.materialize(doc_id)?.unwrap_or_default();
            row.insert("score".to_string(), score.to_string());
            docs.push(row);
        }
        Ok(docs)
    }

    /// Serialize the (now-frozen) index into a fresh directory.
    pub fn save(&mut self, db_dir: impl AsRef<Path>) -> Result<()> {
        if self.num_docs() == 0 {
            return Err(Error::State("cannot save an empty index".to_string()));
        }
        let frozen = self.ensure_frozen()?;
        persistence::save(frozen, db_dir)
    }

    /// Load a previously saved index, ready to query immediately.
    pub fn load(db_dir: impl AsRef<Path>) -> Result<Self> {
        let frozen = persistence::load(db_dir)?;
        let tokenizer = Tokenizer::new(&frozen.options.stopwords);
        Ok(Self {
            state: State::Frozen(frozen),
            tokenizer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Document;

    fn opts(fields: &[&str]) -> BuildOptions {
        BuildOptions {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn doc(pairs: &[(&str, &str)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_before_any_documents_errors_on_save_but_not_on_empty_topk() {
        let mut engine = Bm25Engine::new(opts(&["title"])).unwrap();
        let err = engine
            .save(std::env::temp_dir().join("rankdex-empty-test"))
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn full_lifecycle_scenario_one() {
        let mut engine = Bm25Engine::new(opts(&["title"])).unwrap();
        engine
            .index_documents([
                doc(&[("title", "hello world")]),
                doc(&[("title", "hello there")]),
                doc(&[("title", "goodbye world")]),
            ])
            .unwrap();
        let (scores, ids) = engine
            .get_topk_indices(Query::Broadcast("hello".to_string()), 3, None)
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&0) && ids.contains(&1));
        assert_eq!(scores.len(), 2);
    }

    #[test]
    fn indexing_after_query_is_rejected() {
        let mut engine = Bm25Engine::new(opts(&["title"])).unwrap();
        engine
            .index_documents([doc(&[("title", "hello world")])])
            .unwrap();
        engine
            .get_topk_indices(Query::Broadcast("hello".to_string()), 1, None)
            .unwrap();
        let err = engine
            .index_documents([doc(&[("title", "more")])])
            .unwrap_err();
        assert!(matches!(err, Error::State(_)));
    }

    #[test]
    fn get_topk_docs_attaches_score_column() {
        let mut engine = Bm25Engine::new(opts(&["title"])).unwrap();
        engine
            .index_documents([doc(&[("title", "hello world")])])
            .unwrap();
        let docs = engine
            .get_topk_docs(
                Query::Broadcast("hello".to_string()),
                1,
                BoostFactors::default(),
                None,
            )
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].contains_key("score"));
        assert_eq!(docs[0].get("title").unwrap(), "hello world");
    }
}
