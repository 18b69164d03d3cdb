//! Character n-gram index over a term dictionary.
//!
//! Assistive only: it proposes candidate dictionary terms for autocomplete and
//! spelling suggestions and is never consulted to answer a search.

use std::collections::HashMap;
use std::path::Path;

use crate::collation::Collation;
use crate::dictionary::{n_grams, prefix_n_grams, TermDictionary};
use crate::error::Result;
use crate::intersect::merge_intersect_ids;
use crate::inverted::InvertedIndex;
use crate::TermId;

pub const BIGRAM: usize = 2;
pub const TRIGRAM: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct NGramIndex {
    k: usize,
    dictionary: TermDictionary,
    index: InvertedIndex<TermId>,
    /// Distinct n-grams per dictionary word, for Jaccard scoring.
    gram_counts: HashMap<TermId, u32>,
}

impl NGramIndex {
    pub fn new(k: usize, collation: Collation) -> Self {
        Self {
            k,
            dictionary: TermDictionary::new(collation),
            index: InvertedIndex::new(),
            gram_counts: HashMap::new(),
        }
    }

    /// Indexes every word of `words`.
    pub fn build(words: &TermDictionary, k: usize) -> Result<Self> {
        let mut dictionary = TermDictionary::new(words.collation());
        let mut index = InvertedIndex::new();
        for term in words.iter() {
            dictionary.construct_n_grams(&term.name, term.term_id, k, &mut index)?;
        }
        Ok(Self::from_parts(k, dictionary, index))
    }

    /// Assembles an index from a (merged) n-gram dictionary and postings.
    pub fn from_parts(k: usize, dictionary: TermDictionary, mut index: InvertedIndex<TermId>) -> Self {
        index.finalize();
        let mut gram_counts: HashMap<TermId, u32> = HashMap::new();
        for (_, words) in index.iter() {
            for word in words {
                *gram_counts.entry(*word).or_insert(0) += 1;
            }
        }
        Self {
            k,
            dictionary,
            index,
            gram_counts,
        }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn dictionary(&self) -> &TermDictionary {
        &self.dictionary
    }

    pub fn index(&self) -> &InvertedIndex<TermId> {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionary.is_empty()
    }

    /// Words containing `gram`.
    pub fn words_with(&self, gram: &str) -> &[TermId] {
        match self.dictionary.get_term_id(gram) {
            Some(id) => self.index.postings(id),
            None => &[],
        }
    }

    /// Words holding every n-gram of `$prefix`. May contain words that do not
    /// actually start with `prefix`; callers verify against the dictionary.
    /// Returns nothing when the prefix is shorter than one full gram.
    pub fn prefix_candidates(&self, prefix: &str) -> Vec<TermId> {
        let grams = prefix_n_grams(prefix, self.k);
        let mut lists = grams.iter().map(|g| self.words_with(g));
        let Some(first) = lists.next() else {
            return Vec::new();
        };
        let mut acc = first.to_vec();
        for list in lists {
            if acc.is_empty() {
                break;
            }
            acc = merge_intersect_ids(&acc, list);
        }
        acc
    }

    /// Dictionary words whose n-gram sets have Jaccard similarity of at least
    /// `min_jaccard` with `word`, most similar first.
    pub fn similar_words(&self, word: &str, min_jaccard: f32) -> Vec<(TermId, f32)> {
        let mut grams = n_grams(word, self.k);
        grams.sort();
        grams.dedup();
        if grams.is_empty() {
            return Vec::new();
        }
        let mut shared: HashMap<TermId, u32> = HashMap::new();
        for gram in &grams {
            for candidate in self.words_with(gram) {
                *shared.entry(*candidate).or_insert(0) += 1;
            }
        }
        let query_len = grams.len() as f32;
        let mut scored: Vec<(TermId, f32)> = shared
            .into_iter()
            .filter_map(|(candidate, common)| {
                let own = self.gram_counts.get(&candidate).copied().unwrap_or(common) as f32;
                let common = common as f32;
                let jaccard = common / (query_len + own - common);
                (jaccard >= min_jaccard).then_some((candidate, jaccard))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    pub fn save(&mut self, dictionary_path: &Path, index_path: &Path) -> Result<()> {
        self.dictionary.save(dictionary_path)?;
        self.index.save_sorted(index_path)
    }

    pub fn load(k: usize, collation: Collation, dictionary_path: &Path, index_path: &Path) -> Result<Self> {
        let dictionary = TermDictionary::load(dictionary_path, collation)?;
        let index = InvertedIndex::load(index_path)?;
        Ok(Self::from_parts(k, dictionary, index))
    }
}
