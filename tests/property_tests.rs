//! Property-based tests for rankdex, per spec.md §8.

use proptest::prelude::*;
use rankdex::prelude::*;

fn words(n: std::ops::Range<usize>, vocab: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(0..vocab, n)
        .prop_map(|ids| ids.into_iter().map(|i| format!("w{i}")).collect())
}

fn build_engine(num_partitions: usize, docs: Vec<Vec<String>>) -> Bm25Engine {
    let options = BuildOptions {
        fields: vec!["body".to_string()],
        num_partitions,
        ..Default::default()
    };
    let mut engine = Bm25Engine::new(options).unwrap();
    let records: Vec<Document> = docs
        .into_iter()
        .map(|tokens| {
            [("body".to_string(), tokens.join(" "))]
                .into_iter()
                .collect()
        })
        .collect();
    engine.index_documents(records).unwrap();
    engine
}

proptest! {
    #[test]
    fn topk_never_exceeds_k(
        doc_tokens in prop::collection::vec(words(1..20, 12), 1..30),
        query_tokens in words(1..5, 12),
        k in 0usize..15,
    ) {
        let mut engine = build_engine(1, doc_tokens);
        let (scores, ids) = engine
            .get_topk_indices(Query::Broadcast(query_tokens.join(" ")), k, None)
            .unwrap();
        prop_assert!(scores.len() <= k);
        prop_assert_eq!(scores.len(), ids.len());
    }

    #[test]
    fn topk_results_are_sorted_descending_by_score(
        doc_tokens in prop::collection::vec(words(1..20, 12), 1..30),
        query_tokens in words(1..5, 12),
    ) {
        let mut engine = build_engine(1, doc_tokens);
        let (scores, _) = engine
            .get_topk_indices(Query::Broadcast(query_tokens.join(" ")), 50, None)
            .unwrap();
        for w in scores.windows(2) {
            prop_assert!(w[0] >= w[1]);
        }
    }

    #[test]
    fn scores_are_non_negative(
        doc_tokens in prop::collection::vec(words(1..20, 12), 1..30),
        query_tokens in words(1..5, 12),
    ) {
        let mut engine = build_engine(1, doc_tokens);
        let (scores, _) = engine
            .get_topk_indices(Query::Broadcast(query_tokens.join(" ")), 50, None)
            .unwrap();
        for s in scores {
            prop_assert!(s >= 0.0);
        }
    }

    #[test]
    fn doc_ids_within_topk_are_unique(
        doc_tokens in prop::collection::vec(words(1..20, 12), 1..30),
        query_tokens in words(1..5, 12),
    ) {
        let mut engine = build_engine(1, doc_tokens);
        let (_, ids) = engine
            .get_topk_indices(Query::Broadcast(query_tokens.join(" ")), 50, None)
            .unwrap();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        prop_assert_eq!(unique.len(), ids.len());
    }

    #[test]
    fn partition_count_does_not_change_topk_membership_or_scores(
        doc_tokens in prop::collection::vec(words(1..20, 12), 2..20),
        query_tokens in words(1..5, 12),
        num_partitions in 2usize..6,
    ) {
        let n = doc_tokens.len();
        let mut engine1 = build_engine(1, doc_tokens.clone());
        let mut enginen = build_engine(num_partitions.min(n), doc_tokens);
        let q = Query::Broadcast(query_tokens.join(" "));
        let (mut scores1, mut ids1) = engine1.get_topk_indices(q.clone(), 50, None).unwrap();
        let (mut scoresn, mut idsn) = enginen.get_topk_indices(q, 50, None).unwrap();
        ids1.sort();
        idsn.sort();
        prop_assert_eq!(ids1, idsn);
        scores1.sort_by(|a, b| a.partial_cmp(b).unwrap());
        scoresn.sort_by(|a, b| a.partial_cmp(b).unwrap());
        prop_assert_eq!(scores1.len(), scoresn.len());
        for (a, b) in scores1.iter().zip(&scoresn) {
            prop_assert!((a - b).abs() < 1e-6, "{} != {}", a, b);
        }
    }
}
