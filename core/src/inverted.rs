use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::dictionary::TermDictionary;
use crate::error::{Error, Result};
use crate::intersect::merge_intersect_ids;
use crate::positional::PositionalIndex;
use crate::query::QueryResult;
use crate::{DocId, TermId};

/// Values a postings list can hold: document IDs, or dictionary term IDs for n-gram postings.
pub trait PostingValue: Copy + Ord + Display + FromStr + Send + Sync + 'static {}

impl<T> PostingValue for T where T: Copy + Ord + Display + FromStr + Send + Sync + 'static {}

/// Term ID → postings. Lists may hold duplicates while a block is being
/// filled; [`InvertedIndex::finalize`] sorts and dedups them.
#[derive(Debug, Clone, PartialEq)]
pub struct InvertedIndex<V = DocId> {
    postings: BTreeMap<TermId, Vec<V>>,
}

impl<V> Default for InvertedIndex<V> {
    fn default() -> Self {
        Self {
            postings: BTreeMap::new(),
        }
    }
}

impl<V: PostingValue> InvertedIndex<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, term_id: TermId, value: V) {
        self.postings.entry(term_id).or_default().push(value);
    }

    /// Replaces a term's postings with an already sorted, duplicate-free list.
    pub fn insert_postings(&mut self, term_id: TermId, values: Vec<V>) {
        debug_assert!(values.windows(2).all(|w| w[0] < w[1]));
        self.postings.insert(term_id, values);
    }

    pub fn finalize(&mut self) {
        for list in self.postings.values_mut() {
            list.sort_unstable();
            list.dedup();
        }
    }

    pub fn postings(&self, term_id: TermId) -> &[V] {
        self.postings.get(&term_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn document_frequency(&self, term_id: TermId) -> u32 {
        self.postings(term_id).len() as u32
    }

    /// Number of terms with postings.
    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TermId, &[V])> {
        self.postings.iter().map(|(id, list)| (*id, list.as_slice()))
    }

    /// Finalizes, then writes one `"{term_id} {v1} {v2} ..."` line per term in ascending term ID order.
    pub fn save_sorted(&mut self, path: &Path) -> Result<()> {
        self.finalize();
        let mut out = BufWriter::new(File::create(path)?);
        for (term_id, list) in &self.postings {
            write_postings_line(&mut out, *term_id, list)?;
        }
        out.flush()?;
        debug!(terms = self.postings.len(), path = %path.display(), "saved postings");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut index = Self::new();
        let mut last: Option<TermId> = None;
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let (term_id, values) = parse_postings_line::<V>(&line)
                .ok_or_else(|| Error::malformed(path, i + 1, "unparsable postings line"))?;
            if last.is_some_and(|prev| prev >= term_id) {
                return Err(Error::malformed(path, i + 1, "term ids not ascending"));
            }
            if !values.windows(2).all(|w| w[0] < w[1]) {
                return Err(Error::malformed(path, i + 1, "postings not strictly ascending"));
            }
            last = Some(term_id);
            index.postings.insert(term_id, values);
        }
        Ok(index)
    }
}

impl InvertedIndex<DocId> {
    /// Boolean AND over every query term. Any unknown term, or an empty query,
    /// gives an empty result.
    pub fn search<S: AsRef<str>>(&self, terms: &[S], dictionary: &TermDictionary) -> QueryResult {
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
        let Some((first, rest)) = split_shortest_first(lists) else {
            return QueryResult::default();
        };
        let mut acc = first.to_vec();
        for list in rest {
            acc = merge_intersect_ids(&acc, list);
            if acc.is_empty() {
                break;
            }
        }
        QueryResult::from_doc_ids(acc)
    }

    /// Keeps the prefix candidates (dictionary positions) that have postings,
    /// most frequent first, then by name.
    pub fn autocomplete_word(
        &self,
        candidates: &[usize],
        dictionary: &TermDictionary,
    ) -> Vec<(String, u32)> {
        let mut ranked: Vec<(String, u32)> = candidates
            .iter()
            .filter_map(|&i| dictionary.get(i))
            .map(|term| (term.name.clone(), self.document_frequency(term.term_id)))
            .filter(|(_, df)| *df > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }
}

impl From<&PositionalIndex> for InvertedIndex<DocId> {
    fn from(positional: &PositionalIndex) -> Self {
        let postings = positional
            .iter()
            .map(|(term_id, list)| (term_id, list.iter().map(|p| p.doc_id).collect()))
            .collect();
        Self { postings }
    }
}

fn split_shortest_first<'a, V>(mut lists: Vec<&'a [V]>) -> Option<(&'a [V], Vec<&'a [V]>)> {
    lists.sort_by_key(|l| l.len());
    let mut iter = lists.into_iter();
    let first = iter.next()?;
    Some((first, iter.collect()))
}

pub(crate) fn write_postings_line<W: Write, V: Display>(
    out: &mut W,
    term_id: TermId,
    values: &[V],
) -> std::io::Result<()> {
    write!(out, "{term_id}")?;
    for v in values {
        write!(out, " {v}")?;
    }
    writeln!(out)
}

pub(crate) fn parse_postings_line<V: FromStr>(line: &str) -> Option<(TermId, Vec<V>)> {
    let mut fields = line.split(' ');
    let term_id = fields.next()?.parse().ok()?;
    let values = fields
        .map(|f| f.parse().ok())
        .collect::<Option<Vec<V>>>()?;
    Some((term_id, values))
}
