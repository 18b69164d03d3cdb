//! Term-document incidence matrix: one bit row per term, one column per document.
//! Only suited to boolean retrieval over small collections.

use std::collections::HashMap;

use crate::dictionary::TermDictionary;
use crate::documents::DocumentTable;
use crate::inverted::InvertedIndex;
use crate::query::QueryResult;
use crate::{DocId, TermId};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidenceMatrix {
    /// Column index → doc ID, ascending.
    columns: Vec<DocId>,
    rows: HashMap<TermId, Vec<u64>>,
}

impl IncidenceMatrix {
    pub fn build(index: &InvertedIndex, documents: &DocumentTable) -> Self {
        let columns: Vec<DocId> = documents.iter().map(|d| d.doc_id).collect();
        let words = columns.len().div_ceil(64);
        let mut rows = HashMap::with_capacity(index.len());
        for (term_id, postings) in index.iter() {
            let mut row = vec![0u64; words];
            for doc_id in postings {
                if let Ok(col) = columns.binary_search(doc_id) {
                    row[col / 64] |= 1 << (col % 64);
                }
            }
            rows.insert(term_id, row);
        }
        Self { columns, rows }
    }

    pub fn num_documents(&self) -> usize {
        self.columns.len()
    }

    pub fn contains(&self, term_id: TermId, doc_id: DocId) -> bool {
        let (Some(row), Ok(col)) = (self.rows.get(&term_id), self.columns.binary_search(&doc_id)) else {
            return false;
        };
        row[col / 64] & (1 << (col % 64)) != 0
    }

    /// AND of the query terms' rows. Unknown terms give an empty result.
    pub fn search<S: AsRef<str>>(&self, terms: &[S], dictionary: &TermDictionary) -> QueryResult {
        if terms.is_empty() {
            return QueryResult::default();
        }
        let mut acc = vec![u64::MAX; self.columns.len().div_ceil(64)];
        for term in terms {
            let row = dictionary
                .get_term_id(term.as_ref())
                .and_then(|id| self.rows.get(&id));
            let Some(row) = row else {
                return QueryResult::default();
            };
            for (a, r) in acc.iter_mut().zip(row) {
                *a &= r;
            }
        }
        let ids = self
            .columns
            .iter()
            .enumerate()
            .filter(|(col, _)| acc[col / 64] & (1 << (col % 64)) != 0)
            .map(|(_, doc_id)| *doc_id)
            .collect();
        QueryResult::from_doc_ids(ids)
    }
}
