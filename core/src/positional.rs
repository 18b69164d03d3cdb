//! Positional postings: phrase matching and tf-idf ranking.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::CategoryId;
use crate::dictionary::TermDictionary;
use crate::documents::DocumentTable;
use crate::error::{Error, Result};
use crate::intersect::merge_intersect_ids;
use crate::query::{QueryResult, ScoredDoc};
use crate::{DocId, TermId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionalPosting {
    pub doc_id: DocId,
    /// Strictly increasing token positions.
    pub positions: Vec<u32>,
}

impl PositionalPosting {
    pub fn term_frequency(&self) -> u32 {
        self.positions.len() as u32
    }
}

/// Transform applied to a raw term frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TermWeighting {
    /// `tf`
    Natural,
    /// `1 + ln(tf)`
    #[default]
    Logarithmic,
    /// `1` when the term is present
    Boolean,
}

impl TermWeighting {
    pub fn weight(self, tf: u32) -> f32 {
        if tf == 0 {
            return 0.0;
        }
        match self {
            TermWeighting::Natural => tf as f32,
            TermWeighting::Logarithmic => 1.0 + (tf as f32).ln(),
            TermWeighting::Boolean => 1.0,
        }
    }
}

impl FromStr for TermWeighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "natural" => Ok(TermWeighting::Natural),
            "logarithmic" => Ok(TermWeighting::Logarithmic),
            "boolean" => Ok(TermWeighting::Boolean),
            _ => Err(Error::InvalidParameter(format!("unknown term weighting: {s}"))),
        }
    }
}

/// Collection-level weight of a term from its document frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentWeighting {
    /// `1`
    No,
    /// `ln(N / df)`
    #[default]
    Idf,
    /// `max(0, ln((N - df) / df))`
    ProbIdf,
}

impl DocumentWeighting {
    pub fn weight(self, num_docs: u32, df: u32) -> f32 {
        if df == 0 {
            return 0.0;
        }
        match self {
            DocumentWeighting::No => 1.0,
            DocumentWeighting::Idf => (num_docs as f32 / df as f32).ln(),
            DocumentWeighting::ProbIdf => {
                (num_docs.saturating_sub(df) as f32 / df as f32).ln().max(0.0)
            }
        }
    }
}

impl FromStr for DocumentWeighting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no" => Ok(DocumentWeighting::No),
            "idf" => Ok(DocumentWeighting::Idf),
            "prob-idf" => Ok(DocumentWeighting::ProbIdf),
            _ => Err(Error::InvalidParameter(format!("unknown document weighting: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionalIndex {
    postings: BTreeMap<TermId, Vec<PositionalPosting>>,
    document_sizes: Option<HashMap<DocId, u32>>,
    category_counts: HashMap<CategoryId, HashMap<TermId, u32>>,
}

impl PositionalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a position. Documents must arrive in ascending order per term
    /// and positions in ascending order per document.
    pub fn add_position(&mut self, term_id: TermId, doc_id: DocId, position: u32) {
        let list = self.postings.entry(term_id).or_default();
        if let Some(last) = list.last_mut() {
            if last.doc_id == doc_id {
                debug_assert!(last.positions.last().map_or(true, |&p| p < position));
                last.positions.push(position);
                return;
            }
            debug_assert!(last.doc_id < doc_id, "documents out of order");
        }
        list.push(PositionalPosting {
            doc_id,
            positions: vec![position],
        });
    }

    pub(crate) fn insert_postings(&mut self, term_id: TermId, postings: Vec<PositionalPosting>) {
        self.postings.insert(term_id, postings);
    }

    pub fn postings(&self, term_id: TermId) -> &[PositionalPosting] {
        self.postings.get(&term_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &[PositionalPosting])> {
        self.postings.iter().map(|(id, list)| (*id, list.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn document_size(&self, doc_id: DocId) -> Option<u32> {
        self.document_sizes.as_ref()?.get(&doc_id).copied()
    }

    pub fn category_counts(&self, category: CategoryId) -> Option<&HashMap<TermId, u32>> {
        self.category_counts.get(&category)
    }

    /// Token count per document, summed over every term's positions.
    pub fn set_document_sizes(&mut self, documents: &DocumentTable) {
        let mut sizes: HashMap<DocId, u32> = documents.iter().map(|d| (d.doc_id, 0)).collect();
        for list in self.postings.values() {
            for posting in list {
                if let Some(size) = sizes.get_mut(&posting.doc_id) {
                    *size += posting.term_frequency();
                }
            }
        }
        debug!(documents = sizes.len(), "document sizes set");
        self.document_sizes = Some(sizes);
    }

    /// Term occurrence counts per category, from each document's category.
    pub fn set_category_counts(&mut self, documents: &DocumentTable) {
        let mut counts: HashMap<CategoryId, HashMap<TermId, u32>> = HashMap::new();
        for (term_id, list) in &self.postings {
            for posting in list {
                let Some(category) = documents.get(posting.doc_id).and_then(|d| d.category) else {
                    continue;
                };
                *counts.entry(category).or_default().entry(*term_id).or_insert(0) +=
                    posting.term_frequency();
            }
        }
        debug!(categories = counts.len(), "category counts set");
        self.category_counts = counts;
    }

    /// Documents where the query terms occur as a contiguous phrase. The score
    /// is the number of phrase occurrences.
    pub fn positional_search<S: AsRef<str>>(
        &self,
        terms: &[S],
        dictionary: &TermDictionary,
    ) -> QueryResult {
        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            let Some(id) = dictionary.get_term_id(term.as_ref()) else {
                return QueryResult::default();
            };
            let list = self.postings(id);
            if list.is_empty() {
                return QueryResult::default();
            }
            lists.push(list);
        }
        let Some(first) = lists.first() else {
            return QueryResult::default();
        };

        let mut candidates: Vec<DocId> = first.iter().map(|p| p.doc_id).collect();
        for list in &lists[1..] {
            let ids: Vec<DocId> = list.iter().map(|p| p.doc_id).collect();
            candidates = merge_intersect_ids(&candidates, &ids);
        }

        let mut items = Vec::new();
        for doc_id in candidates {
            let positions: Vec<&[u32]> = lists
                .iter()
                .filter_map(|list| find_posting(list, doc_id))
                .map(|p| p.positions.as_slice())
                .collect();
            let matches = positions[0]
                .iter()
                .filter(|&&start| {
                    positions
                        .iter()
                        .enumerate()
                        .skip(1)
                        .all(|(i, ps)| {
                            start
                                .checked_add(i as u32)
                                .is_some_and(|p| ps.binary_search(&p).is_ok())
                        })
                })
                .count();
            if matches > 0 {
                items.push(ScoredDoc {
                    doc_id,
                    score: matches as f32,
                });
            }
        }
        QueryResult::from_items(items)
    }

    /// Top-`k` documents by tf-idf dot product. Unknown terms weigh zero.
    /// Requires [`PositionalIndex::set_document_sizes`].
    #[allow(clippy::too_many_arguments)]
    pub fn ranked_search<S: AsRef<str>>(
        &self,
        terms: &[S],
        dictionary: &TermDictionary,
        documents: &DocumentTable,
        term_weighting: TermWeighting,
        document_weighting: DocumentWeighting,
        normalize: bool,
        k: usize,
    ) -> Result<QueryResult> {
        let sizes = self
            .document_sizes
            .as_ref()
            .ok_or(Error::IndexNotPrepared("document sizes"))?;
        let num_docs = documents.len() as u32;

        let mut query_tf: BTreeMap<TermId, u32> = BTreeMap::new();
        for term in terms {
            if let Some(id) = dictionary.get_term_id(term.as_ref()) {
                *query_tf.entry(id).or_insert(0) += 1;
            }
        }

        let mut scores: HashMap<DocId, f32> = HashMap::new();
        for (term_id, tf) in query_tf {
            let list = self.postings(term_id);
            if list.is_empty() {
                continue;
            }
            let query_weight =
                term_weighting.weight(tf) * document_weighting.weight(num_docs, list.len() as u32);
            for posting in list {
                let doc_weight = term_weighting.weight(posting.term_frequency());
                *scores.entry(posting.doc_id).or_insert(0.0) += query_weight * doc_weight;
            }
        }

        let mut scored: Vec<ScoredDoc> = scores
            .into_iter()
            .map(|(doc_id, mut score)| {
                if normalize {
                    let size = sizes.get(&doc_id).copied().unwrap_or(0);
                    if size > 0 {
                        score /= (size as f32).sqrt();
                    }
                }
                ScoredDoc { doc_id, score }
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));
        scored.truncate(k);
        Ok(QueryResult::from_items(scored))
    }

    /// Writes `"{term_id} {doc}:{p1},{p2} ..."` lines in ascending term ID order.
    pub fn save_sorted(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for (term_id, list) in &self.postings {
            write_positional_line(&mut out, *term_id, list)?;
        }
        out.flush()?;
        debug!(terms = self.postings.len(), path = %path.display(), "saved positional postings");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut index = Self::new();
        let mut last: Option<TermId> = None;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let (term_id, list) = parse_positional_line(&line)
                .ok_or_else(|| Error::malformed(path, i + 1, "unparsable positional line"))?;
            if last.is_some_and(|prev| prev >= term_id) {
                return Err(Error::malformed(path, i + 1, "term ids not ascending"));
            }
            if !list.windows(2).all(|w| w[0].doc_id < w[1].doc_id)
                || !list.iter().all(|p| p.positions.windows(2).all(|w| w[0] < w[1]))
            {
                return Err(Error::malformed(path, i + 1, "postings out of order"));
            }
            last = Some(term_id);
            index.postings.insert(term_id, list);
        }
        Ok(index)
    }
}

fn find_posting(list: &[PositionalPosting], doc_id: DocId) -> Option<&PositionalPosting> {
    list.binary_search_by_key(&doc_id, |p| p.doc_id)
        .ok()
        .map(|i| &list[i])
}

pub(crate) fn write_positional_line<W: Write>(
    out: &mut W,
    term_id: TermId,
    list: &[PositionalPosting],
) -> std::io::Result<()> {
    write!(out, "{term_id}")?;
    for posting in list {
        write!(out, " {}:", posting.doc_id)?;
        for (i, p) in posting.positions.iter().enumerate() {
            if i > 0 {
                write!(out, ",")?;
            }
            write!(out, "{p}")?;
        }
    }
    writeln!(out)
}

pub(crate) fn parse_positional_line(line: &str) -> Option<(TermId, Vec<PositionalPosting>)> {
    let mut fields = line.split(' ');
    let term_id = fields.next()?.parse().ok()?;
    let list = fields
        .map(|field| {
            let (doc, positions) = field.split_once(':')?;
            let positions = positions
                .split(',')
                .map(|p| p.parse().ok())
                .collect::<Option<Vec<u32>>>()?;
            Some(PositionalPosting {
                doc_id: doc.parse().ok()?,
                positions,
            })
        })
        .collect::<Option<Vec<_>>>()?;
    Some((term_id, list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collation::Collation;
    use crate::documents::DocumentMeta;
    use tempfile::tempdir;

    fn index_of(docs: &[(DocId, &str)]) -> (TermDictionary, PositionalIndex, DocumentTable) {
        let mut dictionary = TermDictionary::new(Collation::Binary);
        let mut index = PositionalIndex::new();
        let mut table = DocumentTable::new();
        let mut occurrences = Vec::new();
        for (doc_id, text) in docs {
            let words: Vec<&str> = text.split_whitespace().collect();
            for (pos, w) in words.iter().enumerate() {
                let id = dictionary.insert(w).unwrap();
                occurrences.push((id, *doc_id, pos as u32));
            }
            table.push(DocumentMeta::new(*doc_id, format!("doc{doc_id}"), words.len() as u32));
        }
        occurrences.sort();
        for (t, d, p) in occurrences {
            index.add_position(t, d, p);
        }
        index.set_document_sizes(&table);
        (dictionary, index, table)
    }

    #[test]
    fn phrase_requires_adjacency() {
        let (dictionary, index, _) = index_of(&[
            (1, "the quick fox"),
            (2, "quick brown fox"),
            (3, "fox quick fox quick fox"),
        ]);
        let result = index.positional_search(&["quick", "fox"], &dictionary);
        assert_eq!(result.doc_ids(), vec![1, 3]);
        assert_eq!(result.items()[1].score, 2.0);
        assert!(index.positional_search(&["quick", "emu"], &dictionary).is_empty());
    }

    #[test]
    fn phrase_at_position_limit_does_not_match() {
        let mut dictionary = TermDictionary::new(Collation::Binary);
        let quick = dictionary.insert("quick").unwrap();
        let fox = dictionary.insert("fox").unwrap();
        let mut index = PositionalIndex::new();
        index.add_position(quick, 1, u32::MAX);
        index.add_position(fox, 1, 0);
        assert!(index.positional_search(&["quick", "fox"], &dictionary).is_empty());
    }

    #[test]
    fn ranked_prefers_shorter_documents() {
        let (dictionary, index, table) = index_of(&[
            (1, "dog a b c d"),
            (2, "dog a b c d e f g h i"),
            (3, "dog a b c d e f g h i j k l m n"),
        ]);
        let result = index
            .ranked_search(
                &["dog"],
                &dictionary,
                &table,
                TermWeighting::Logarithmic,
                DocumentWeighting::No,
                true,
                10,
            )
            .unwrap();
        assert_eq!(result.doc_ids(), vec![1, 2, 3]);
    }

    #[test]
    fn ranked_ties_break_by_doc_id_and_truncate() {
        let (dictionary, index, table) = index_of(&[(7, "dog cat"), (3, "dog cat"), (5, "dog cat")]);
        let result = index
            .ranked_search(
                &["dog", "unknown"],
                &dictionary,
                &table,
                TermWeighting::Natural,
                DocumentWeighting::No,
                false,
                2,
            )
            .unwrap();
        assert_eq!(result.doc_ids(), vec![3, 5]);
    }

    #[test]
    fn ranked_needs_sizes() {
        let index = PositionalIndex::new();
        let err = index
            .ranked_search::<&str>(
                &[],
                &TermDictionary::default(),
                &DocumentTable::new(),
                TermWeighting::Natural,
                DocumentWeighting::Idf,
                true,
                5,
            )
            .unwrap_err();
        assert!(matches!(err, Error::IndexNotPrepared(_)));
    }

    #[test]
    fn weighting_functions() {
        assert_eq!(TermWeighting::Natural.weight(3), 3.0);
        assert_eq!(TermWeighting::Boolean.weight(3), 1.0);
        assert_eq!(TermWeighting::Logarithmic.weight(1), 1.0);
        assert_eq!(DocumentWeighting::No.weight(10, 2), 1.0);
        assert!((DocumentWeighting::Idf.weight(10, 1) - 10f32.ln()).abs() < 1e-6);
        assert_eq!(DocumentWeighting::ProbIdf.weight(4, 4), 0.0);
    }

    #[test]
    fn sizes_and_category_counts() {
        let (_, mut index, mut table) = index_of(&[(1, "a b a"), (2, "b c")]);
        table.set_category(1, Some(4));
        table.set_category(2, Some(4));
        index.set_category_counts(&table);
        assert_eq!(index.document_size(1), Some(3));
        let counts = index.category_counts(4).unwrap();
        assert_eq!(counts[&crate::dictionary::term_id("b")], 2);
        assert_eq!(counts[&crate::dictionary::term_id("a")], 2);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.txt");
        let (_, index, _) = index_of(&[(1, "a b a"), (2, "b c")]);
        index.save_sorted(&path).unwrap();
        let loaded = PositionalIndex::load(&path).unwrap();
        assert_eq!(loaded.postings(crate::dictionary::term_id("a")), index.postings(crate::dictionary::term_id("a")));
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            parse_positional_line("9 1:0,2 4:7"),
            Some((
                9,
                vec![
                    PositionalPosting { doc_id: 1, positions: vec![0, 2] },
                    PositionalPosting { doc_id: 4, positions: vec![7] },
                ]
            ))
        );
    }
}
