//! Result-set intersection strategies.
//!
//! All three strategies return the same documents; they differ in cost.
//! The result keeps the order and scores of the main side.

use crate::query::{QueryResult, RetrievalType};
use crate::DocId;

/// Filter sizes below this are intersected by linear scan.
pub const LINEAR_SCAN_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntersectStrategy {
    Linear,
    Binary,
    Merge,
}

impl IntersectStrategy {
    /// Picks the strategy from the filter size and the main side's ordering.
    pub fn select(filter_len: usize, retrieval_type: RetrievalType) -> Self {
        if filter_len < LINEAR_SCAN_LIMIT {
            IntersectStrategy::Linear
        } else if retrieval_type == RetrievalType::Ranked {
            IntersectStrategy::Binary
        } else {
            IntersectStrategy::Merge
        }
    }

    /// Intersects `main` with `filter`. `filter` must be sorted by doc ID;
    /// the merge strategy additionally requires `main` sorted by doc ID.
    pub fn apply(self, main: &QueryResult, filter: &QueryResult) -> QueryResult {
        match self {
            IntersectStrategy::Linear => linear_intersect(main, filter),
            IntersectStrategy::Binary => binary_intersect(main, filter),
            IntersectStrategy::Merge => merge_intersect(main, filter),
        }
    }
}

pub fn linear_intersect(main: &QueryResult, filter: &QueryResult) -> QueryResult {
    main.iter()
        .filter(|item| filter.iter().any(|f| f.doc_id == item.doc_id))
        .copied()
        .collect()
}

pub fn binary_intersect(main: &QueryResult, filter: &QueryResult) -> QueryResult {
    let ids = filter.doc_ids();
    main.iter()
        .filter(|item| ids.binary_search(&item.doc_id).is_ok())
        .copied()
        .collect()
}

pub fn merge_intersect(main: &QueryResult, filter: &QueryResult) -> QueryResult {
    QueryResult::from_items(merge_intersect_by(main.items(), filter.items(), |d| d.doc_id, |d| d.doc_id))
}

/// O(n + m) intersection of two sorted, duplicate-free ID lists.
pub fn merge_intersect_ids<V: Ord + Copy>(a: &[V], b: &[V]) -> Vec<V> {
    merge_intersect_by(a, b, |v| *v, |v| *v)
}

/// Items of `a` whose key also occurs in `b`; both sorted by key, without duplicates.
fn merge_intersect_by<A, B, K>(a: &[A], b: &[B], key_a: impl Fn(&A) -> K, key_b: impl Fn(&B) -> K) -> Vec<A>
where
    A: Copy,
    K: Ord,
{
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        match key_a(&a[i]).cmp(&key_b(&b[j])) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Sorted union of two sorted, duplicate-free lists.
pub fn union_sorted<V: Ord + Copy>(a: &[V], b: &[V]) -> Vec<V> {
    let (mut i, mut j) = (0, 0);
    let mut out = Vec::with_capacity(a.len() + b.len());
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[DocId]) -> QueryResult {
        QueryResult::from_doc_ids(v.to_vec())
    }

    #[test]
    fn strategy_selection() {
        assert_eq!(IntersectStrategy::select(3, RetrievalType::Ranked), IntersectStrategy::Linear);
        assert_eq!(IntersectStrategy::select(10, RetrievalType::Ranked), IntersectStrategy::Binary);
        assert_eq!(IntersectStrategy::select(10, RetrievalType::Boolean), IntersectStrategy::Merge);
        assert_eq!(IntersectStrategy::select(50, RetrievalType::Positional), IntersectStrategy::Merge);
    }

    #[test]
    fn strategies_agree() {
        let main = ids(&[1, 3, 5, 7, 9, 11, 13]);
        let filter = ids(&[2, 3, 4, 5, 11, 12]);
        let expected = vec![3, 5, 11];
        for s in [IntersectStrategy::Linear, IntersectStrategy::Binary, IntersectStrategy::Merge] {
            assert_eq!(s.apply(&main, &filter).doc_ids(), expected, "{s:?}");
        }
    }

    #[test]
    fn binary_keeps_ranked_order() {
        let main = QueryResult::from_items(vec![
            crate::query::ScoredDoc { doc_id: 9, score: 3.0 },
            crate::query::ScoredDoc { doc_id: 2, score: 2.0 },
            crate::query::ScoredDoc { doc_id: 5, score: 1.0 },
        ]);
        let out = binary_intersect(&main, &ids(&[2, 9]));
        assert_eq!(out.doc_ids(), vec![9, 2]);
        assert_eq!(out.items()[0].score, 3.0);
    }

    #[test]
    fn merge_keeps_main_scores() {
        let main = QueryResult::from_items(vec![
            crate::query::ScoredDoc { doc_id: 2, score: 0.5 },
            crate::query::ScoredDoc { doc_id: 4, score: 1.5 },
            crate::query::ScoredDoc { doc_id: 8, score: 2.5 },
        ]);
        let out = merge_intersect(&main, &ids(&[1, 4, 8, 9]));
        assert_eq!(out.doc_ids(), vec![4, 8]);
        assert_eq!(out.items()[1].score, 2.5);
        assert_eq!(merge_intersect_ids(&[1u32, 4, 8], &[4, 9]), vec![4]);
    }

    #[test]
    fn union_merges_and_dedups() {
        assert_eq!(union_sorted(&[1, 4, 6], &[2, 4, 7, 9]), vec![1, 2, 4, 6, 7, 9]);
        assert_eq!(union_sorted::<u32>(&[], &[3]), vec![3]);
    }
}
