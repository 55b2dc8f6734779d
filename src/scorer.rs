//! BM25 top-k scoring with WAND-style pruning, executed per partition and
//! merged into a single ranked result.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;
use tracing::trace;

use crate::error::Result;
use crate::index::FrozenIndex;
use crate::query::{BoostFactors, Query};
use crate::tokenize::Tokenizer;
use crate::vbyte::PostingCursor;

#[derive(PartialEq)]
struct FloatOrd(f64);
impl Eq for FloatOrd {}
impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

struct TermState<'a> {
    boost: f64,
    idf: f64,
    ub: f64,
    cursor: PostingCursor<'a>,
    k1: f64,
    b: f64,
    avg_len: f64,
    lens: &'a [u32],
    num_partitions: u64,
}

impl TermState<'_> {
    fn doc_len(&self, doc_id: u64) -> f64 {
        let local = (doc_id / self.num_partitions) as usize;
        self.lens.get(local).copied().unwrap_or(0) as f64
    }

    fn contribution(&self, doc_id: u64) -> f64 {
        let tf = self.cursor.current_tf() as f64;
        let len = self.doc_len(doc_id);
        let norm = 1.0 - self.b + self.b * (len / self.avg_len);
        self.boost * self.idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm)
    }
}

/// Run the top-k scan for a single partition. Returns up to `k`
/// `(score, doc_id)` pairs, not yet merged with other partitions.
fn score_partition(
    frozen: &FrozenIndex,
    partition_idx: usize,
    pairs: &[(usize, String)],
    boosts: &BoostFactors,
    tokenizer: &Tokenizer,
    k: usize,
    query_max_df: Option<usize>,
) -> Result<Vec<(f64, u64)>> {
    if k == 0 {
        return Ok(Vec::new());
    }
    let num_partitions = frozen.num_partitions() as u64;
    let mut states: Vec<TermState> = Vec::new();

    for (field_idx, text) in pairs {
        let field = &frozen.fields[*field_idx];
        let partition = &field.partitions[partition_idx];
        let field_name = &frozen.field_names()[*field_idx];
        let boost = boosts.for_field(field_name);

        for term in tokenizer.tokenize(text) {
            let bloom_says_absent = !partition.bloom.contains(&term);
            // A negative Bloom result is only trustworthy when every kept
            // term was inserted (the default bloom_df_threshold policy);
            // with an explicit threshold a common term above it was never
            // inserted, so fall through to the authoritative vocab lookup.
            if bloom_says_absent && frozen.options.bloom_df_threshold.is_none() {
                continue;
            }
            let Some(term_id) = partition.term_id(&term) else {
                continue;
            };
            let df = partition.df_of(term_id) as usize;
            if let Some(cap) = query_max_df {
                if df > cap {
                    continue;
                }
            }
            // idf uses corpus-wide stats (Nf = total documents, global df =
            // postings summed over every partition at freeze time) so it is
            // invariant to num_partitions; partition-local df is only used
            // for the query_max_df cap above.
            let nf = frozen.num_docs as f64;
            let global_df = partition.global_df_of(term_id) as f64;
            let idf = (((nf - global_df + 0.5) / (global_df + 0.5)) + 1.0)
                .ln()
                .max(0.0);
            let ub = idf * (frozen.k1() + 1.0);
            let cursor = partition.cursor(term_id)?;
            if cursor.current_doc_id().is_none() {
                continue;
            }
            states.push(TermState {
                boost,
                idf,
                ub,
                cursor,
                k1: frozen.k1(),
                b: frozen.b(),
                avg_len: field.avg_len,
                lens: &partition.lens,
                num_partitions,
            });
        }
    }

    if states.is_empty() {
        return Ok(Vec::new());
    }

    let mut heap: BinaryHeap<Reverse<(FloatOrd, Reverse<u64>)>> = BinaryHeap::with_capacity(k + 1);
    let mut skipped_by_wand = 0usize;

    loop {
        let min_doc = states
            .iter()
            .filter_map(|s| s.cursor.current_doc_id())
            .min();
        let Some(d) = min_doc else { break };

        let at_d: Vec<usize> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.cursor.current_doc_id() == Some(d))
            .map(|(i, _)| i)
            .collect();

        let threshold = heap
            .peek()
            .map(|Reverse((FloatOrd(s), _))| *s)
            .unwrap_or(0.0);
        let bound: f64 = at_d.iter().map(|&i| states[i].ub).sum();

        if heap.len() < k || bound > threshold {
            let score: f64 = at_d.iter().map(|&i| states[i].contribution(d)).sum();
            if score.is_finite() && score > 0.0 {
                if heap.len() < k {
                    heap.push(Reverse((FloatOrd(score), Reverse(d))));
                } else if score > threshold {
                    heap.pop();
                    heap.push(Reverse((FloatOrd(score), Reverse(d))));
                }
            }
        } else {
            skipped_by_wand += 1;
        }

        for &i in &at_d {
            states[i].cursor.advance()?;
        }
    }

    trace!(partition_idx, skipped_by_wand, "partition scan complete");

    let mut results: Vec<(f64, u64)> = heap
        .into_iter()
        .map(|Reverse((FloatOrd(score), Reverse(doc_id)))| (score, doc_id))
        .collect();
    results.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
    Ok(results)
}

/// Evaluate `query` against the whole (all-partition) index, returning up
/// to `k` `(score, doc_id)` pairs in descending-score order, ties broken
/// by ascending doc-id.
pub fn topk(
    frozen: &FrozenIndex,
    query: &Query,
    k: usize,
    boosts: &BoostFactors,
    query_max_df: Option<usize>,
    tokenizer: &Tokenizer,
) -> Result<Vec<(f64, u64)>> {
    let pairs = query.normalize(&frozen.options)?;
    if pairs.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let partial: Vec<Vec<(f64, u64)>> = (0..frozen.num_partitions())
        .into_par_iter()
        .map(|p| score_partition(frozen, p, &pairs, boosts, tokenizer, k, query_max_df))
        .collect::<Result<Vec<_>>>()?;

    let mut merged: Vec<(f64, u64)> = partial.into_iter().flatten().collect();
    merged.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap().then(a.1.cmp(&b.1)));
    merged.truncate(k);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BuildOptions;
    use crate::index::IndexBuilder;
    use crate::source::Document;
    use crate::tokenize::Stopwords;
    use std::collections::HashMap;

    fn doc(pairs: &[(&str, &str)]) -> Document {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn build(fields: &[&str], num_partitions: usize, docs: Vec<Document>) -> FrozenIndex {
        let opts = BuildOptions {
            fields: fields.iter().map(|s| s.to_string()).collect(),
            num_partitions,
            ..Default::default()
        };
        let mut builder = IndexBuilder::new(opts).unwrap();
        builder.index_documents(docs).unwrap();
        builder.freeze().unwrap()
    }

    #[test]
    fn scenario_one_hello_matches_first_two_docs() {
        let frozen = build(
            &["title"],
            1,
            vec![
                doc(&[("title", "hello world")]),
                doc(&[("title", "hello there")]),
                doc(&[("title", "goodbye world")]),
            ],
        );
        let tokenizer = Tokenizer::new(&Stopwords::None);
        let results = topk(
            &frozen,
            &Query::Broadcast("hello".to_string()),
            3,
            &BoostFactors::default(),
            None,
            &tokenizer,
        )
        .unwrap();
        let ids: Vec<u64> = results.iter().map(|(_, d)| *d).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&0) && ids.contains(&1));
        assert!((results[0].0 - results[1].0).abs() < 1e-9);
    }

    #[test]
    fn boosted_multi_field_query_ranks_matching_both_first() {
        let frozen = build(
            &["title", "artist"],
            1,
            vec![
                doc(&[("title", "the wall"), ("artist", "pink floyd")]),
                doc(&[("title", "pink moon"), ("artist", "nick drake")]),
                doc(&[("title", "the bends"), ("artist", "radiohead")]),
            ],
        );
        let tokenizer = Tokenizer::new(&Stopwords::None);
        let mut named = HashMap::new();
        named.insert("title".to_string(), "the".to_string());
        named.insert("artist".to_string(), "pink".to_string());
        let boosts = BoostFactors::new([("title".to_string(), 1.0), ("artist".to_string(), 2.0)]);
        let results = topk(&frozen, &Query::Named(named), 3, &boosts, None, &tokenizer).unwrap();
        let ids: Vec<u64> = results.iter().map(|(_, d)| *d).collect();
        // Doc 1 ("pink moon" / "nick drake") matches neither "the" in title
        // nor "pink" in artist, so it is correctly absent rather than
        // ranking third.
        assert_eq!(ids, vec![0, 2]);
    }

    #[test]
    fn unknown_terms_yield_empty_result() {
        let frozen = build(&["title"], 1, vec![doc(&[("title", "hello world")])]);
        let tokenizer = Tokenizer::new(&Stopwords::None);
        let results = topk(
            &frozen,
            &Query::Broadcast("zzz".to_string()),
            3,
            &BoostFactors::default(),
            None,
            &tokenizer,
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn empty_query_text_yields_empty_result() {
        let frozen = build(&["title"], 1, vec![doc(&[("title", "hello world")])]);
        let tokenizer = Tokenizer::new(&Stopwords::None);
        let results = topk(
            &frozen,
            &Query::Broadcast(String::new()),
            3,
            &BoostFactors::default(),
            None,
            &tokenizer,
        )
        .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn partition_count_does_not_change_topk_membership_or_scores() {
        let docs = vec![
            doc(&[("title", "hello world")]),
            doc(&[("title", "hello there")]),
            doc(&[("title", "goodbye world")]),
            doc(&[("title", "hello again")]),
        ];
        let frozen1 = build(&["title"], 1, docs.clone());
        let frozen4 = build(&["title"], 4, docs);
        let tokenizer = Tokenizer::new(&Stopwords::None);
        let q = Query::Broadcast("hello".to_string());
        let mut scored1 =
            topk(&frozen1, &q, 10, &BoostFactors::default(), None, &tokenizer).unwrap();
        let mut scored4 =
            topk(&frozen4, &q, 10, &BoostFactors::default(), None, &tokenizer).unwrap();
        scored1.sort_by_key(|a| a.1);
        scored4.sort_by_key(|a| a.1);
        assert_eq!(scored1.len(), scored4.len());
        for ((score1, d1), (score4, d4)) in scored1.iter().zip(&scored4) {
            assert_eq!(d1, d4);
            assert!((score1 - score4).abs() < 1e-9, "{score1} != {score4}");
        }

        let mut r1: Vec<u64> = scored1.iter().map(|(_, d)| *d).collect();
        let mut r4: Vec<u64> = scored4.iter().map(|(_, d)| *d).collect();
        r1.sort();
        r4.sort();
        assert_eq!(r1, r4);
    }
}
