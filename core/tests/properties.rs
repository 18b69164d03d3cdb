use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use proptest::sample::Index;
use sift_core::intersect::IntersectStrategy;
use sift_core::{
    CategoryTree, Collation, DocId, DocumentMeta, DocumentTable, DocumentWeighting, IndexMerger,
    InvertedIndex, PositionalIndex, QueryResult, TermDictionary, TermId, TermWeighting,
};
use tempfile::tempdir;

const VOCABULARY: [&str; 4] = ["ka", "lo", "mu", "ne"];

fn sorted_ids(max: DocId) -> impl Strategy<Value = Vec<DocId>> {
    prop::collection::btree_set(0..max, 0..40).prop_map(|s| s.into_iter().collect())
}

/// Documents as sequences of vocabulary indexes.
fn documents() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(0..VOCABULARY.len(), 0..12), 1..8)
}

fn positional(docs: &[Vec<usize>]) -> (TermDictionary, PositionalIndex, DocumentTable) {
    let mut dictionary = TermDictionary::new(Collation::Binary);
    let mut occurrences = Vec::new();
    let mut table = DocumentTable::new();
    for (i, words) in docs.iter().enumerate() {
        let doc_id = i as DocId + 1;
        for (pos, w) in words.iter().enumerate() {
            let id = dictionary.insert(VOCABULARY[*w]).unwrap();
            occurrences.push((id, doc_id, pos as u32));
        }
        table.push(DocumentMeta::new(doc_id, format!("d{doc_id}"), words.len() as u32));
    }
    occurrences.sort();
    let mut index = PositionalIndex::new();
    for (term, doc, pos) in occurrences {
        index.add_position(term, doc, pos);
    }
    index.set_document_sizes(&table);
    (dictionary, index, table)
}

proptest! {
    #[test]
    fn intersection_strategies_agree(main in sorted_ids(200), filter in sorted_ids(200)) {
        let main = QueryResult::from_doc_ids(main);
        let filter = QueryResult::from_doc_ids(filter);
        let expected: Vec<DocId> = main
            .doc_ids()
            .into_iter()
            .filter(|d| filter.doc_ids().contains(d))
            .collect();
        for strategy in [IntersectStrategy::Linear, IntersectStrategy::Binary, IntersectStrategy::Merge] {
            prop_assert_eq!(strategy.apply(&main, &filter).doc_ids(), expected.clone());
        }
    }

    #[test]
    fn merged_postings_are_the_union(
        blocks in prop::collection::vec(
            prop::collection::btree_map(0..20u64, prop::collection::btree_set(0..60u32, 1..6), 0..6),
            1..5,
        )
    ) {
        let dir = tempdir().unwrap();
        let mut inputs = Vec::new();
        let mut expected: BTreeMap<TermId, BTreeSet<DocId>> = BTreeMap::new();
        for (i, block) in blocks.iter().enumerate() {
            let mut index = InvertedIndex::<DocId>::new();
            for (term, docs) in block {
                for doc in docs {
                    index.add(*term, *doc);
                    expected.entry(*term).or_default().insert(*doc);
                }
            }
            let path = dir.path().join(format!("block{i}"));
            index.save_sorted(&path).unwrap();
            inputs.push(path);
        }
        let out = dir.path().join("merged");
        IndexMerger::default().merge_postings::<DocId>(&inputs, &out).unwrap();
        let merged = InvertedIndex::<DocId>::load(&out).unwrap();
        prop_assert_eq!(merged.len(), expected.len());
        for (term, docs) in expected {
            let docs: Vec<DocId> = docs.into_iter().collect();
            prop_assert_eq!(merged.postings(term), docs.as_slice());
        }
    }

    #[test]
    fn phrase_matches_are_adjacent(docs in documents(), first in 0..4usize, second in 0..4usize) {
        let (dictionary, index, _) = positional(&docs);
        let result = index.positional_search(&[VOCABULARY[first], VOCABULARY[second]], &dictionary);
        let expected: Vec<DocId> = docs
            .iter()
            .enumerate()
            .filter(|(_, words)| words.windows(2).any(|w| w[0] == first && w[1] == second))
            .map(|(i, _)| i as DocId + 1)
            .collect();
        prop_assert_eq!(result.doc_ids(), expected);
    }

    #[test]
    fn ranked_scores_never_increase(
        docs in documents(),
        query in prop::collection::vec(0..4usize, 1..4),
    ) {
        let (dictionary, index, table) = positional(&docs);
        let terms: Vec<&str> = query.iter().map(|w| VOCABULARY[*w]).collect();
        for weighting in [TermWeighting::Natural, TermWeighting::Logarithmic, TermWeighting::Boolean] {
            let result = index
                .ranked_search(&terms, &dictionary, &table, weighting, DocumentWeighting::Idf, true, 100)
                .unwrap();
            for pair in result.items().windows(2) {
                prop_assert!(
                    pair[0].score > pair[1].score
                        || (pair[0].score == pair[1].score && pair[0].doc_id < pair[1].doc_id)
                );
            }
        }
    }

    #[test]
    fn descendant_is_irreflexive_and_transitive(parents in prop::collection::vec(any::<Index>(), 1..16)) {
        let mut tree = CategoryTree::new();
        for (i, parent) in parents.iter().enumerate() {
            // node i + 1 hangs under the root or an earlier node
            tree.add_child(parent.index(i + 1), &format!("n{i}"));
        }
        let n = parents.len() + 1;
        for a in 0..n {
            prop_assert!(!tree.is_descendant(a, a));
            for b in 0..n {
                for c in 0..n {
                    if tree.is_descendant(a, b) && tree.is_descendant(b, c) {
                        prop_assert!(tree.is_descendant(a, c));
                    }
                }
            }
        }
    }
}
