//! Sorted term dictionary with content-derived term IDs.
//!
//! Term IDs are the xxh3-64 hash of the term name, so a term gets the same ID
//! in every block and every rebuild. Block dictionaries can therefore be
//! merged by a plain smallest-name scan without renumbering.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::iter;
use std::path::Path;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::collation::Collation;
use crate::error::{Error, Result};
use crate::inverted::InvertedIndex;
use crate::TermId;

/// Boundary marker used around words before n-gram extraction.
pub const NGRAM_BOUNDARY: char = '$';

/// Content-derived ID of a term name.
pub fn term_id(name: &str) -> TermId {
    xxh3_64(name.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub term_id: TermId,
}

impl Term {
    /// Term with its hashed ID.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let term_id = term_id(&name);
        Self { name, term_id }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermDictionary {
    collation: Collation,
    terms: Vec<Term>,
    ids: HashSet<TermId>,
}

impl TermDictionary {
    pub fn new(collation: Collation) -> Self {
        Self {
            collation,
            terms: Vec::new(),
            ids: HashSet::new(),
        }
    }

    pub fn collation(&self) -> Collation {
        self.collation
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Term> {
        self.terms.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Term> {
        self.terms.iter()
    }

    pub fn contains_id(&self, term_id: TermId) -> bool {
        self.ids.contains(&term_id)
    }

    /// Inserts `name` at its sorted position and returns that position.
    ///
    /// Re-adding a term with the same ID is a no-op. A name offered with a
    /// different ID, or an ID already owned by another name, is a collision.
    pub fn add_term(&mut self, name: &str, term_id: TermId) -> Result<usize> {
        debug_assert!(!name.contains('\n'), "term names are line-delimited on disk");
        match self.search(name) {
            Ok(index) => {
                let existing = &self.terms[index];
                if existing.term_id == term_id {
                    Ok(index)
                } else {
                    Err(Error::DuplicateTermIdCollision {
                        term_id,
                        existing: format!("{} (id {})", existing.name, existing.term_id),
                        incoming: name.to_string(),
                    })
                }
            }
            Err(index) => {
                if !self.ids.insert(term_id) {
                    return Err(self.collision(term_id, name));
                }
                self.terms.insert(
                    index,
                    Term {
                        name: name.to_string(),
                        term_id,
                    },
                );
                Ok(index)
            }
        }
    }

    /// Adds `name` under its hashed ID.
    pub fn insert(&mut self, name: &str) -> Result<TermId> {
        let id = term_id(name);
        self.add_term(name, id)?;
        Ok(id)
    }

    pub fn get_word_index(&self, name: &str) -> Option<usize> {
        self.search(name).ok()
    }

    pub fn get_term_id(&self, name: &str) -> Option<TermId> {
        self.get_word_index(name).map(|i| self.terms[i].term_id)
    }

    /// First index whose entry starts with `prefix`, or `None` when no entry does.
    pub fn get_word_starting_with(&self, prefix: &str) -> Option<usize> {
        let start = self
            .terms
            .partition_point(|t| self.collation.compare_primary(&t.name, prefix) == Ordering::Less);
        self.terms
            .get(start)
            .filter(|t| self.collation.starts_with(&t.name, prefix))
            .map(|_| start)
    }

    /// The contiguous run of entries sharing `prefix`, with their indices.
    pub fn words_starting_with<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Term)> + 'a {
        let start = self.get_word_starting_with(prefix).unwrap_or(self.terms.len());
        self.terms[start..]
            .iter()
            .take_while(move |t| self.collation.starts_with(&t.name, prefix))
            .enumerate()
            .map(move |(offset, t)| (start + offset, t))
    }

    /// Term ID → dictionary position, for reverse lookups on a finished dictionary.
    pub fn positions_by_id(&self) -> HashMap<TermId, usize> {
        self.terms
            .iter()
            .enumerate()
            .map(|(i, t)| (t.term_id, i))
            .collect()
    }

    /// Slides a window of `k` characters over the boundary-marked `word`,
    /// registering every n-gram here and an edge `n-gram -> word_id` in `index`.
    pub fn construct_n_grams(
        &mut self,
        word: &str,
        word_id: TermId,
        k: usize,
        index: &mut InvertedIndex<TermId>,
    ) -> Result<()> {
        for gram in n_grams(word, k) {
            let gram_id = term_id(&gram);
            self.add_term(&gram, gram_id)?;
            index.add(gram_id, word_id);
        }
        Ok(())
    }

    /// Writes `"{term_id} {name}"` lines in dictionary order.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for term in &self.terms {
            writeln!(out, "{} {}", term.term_id, term.name)?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn load(path: &Path, collation: Collation) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut dictionary = Self::new(collation);
        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let (id, name) = parse_dictionary_line(&line)
                .ok_or_else(|| Error::malformed(path, i + 1, "expected \"{term_id} {name}\""))?;
            if let Some(last) = dictionary.terms.last() {
                if collation.compare(&last.name, name) != Ordering::Less {
                    return Err(Error::malformed(path, i + 1, format!("{name:?} out of order")));
                }
            }
            if !dictionary.ids.insert(id) {
                return Err(dictionary.collision(id, name));
            }
            dictionary.terms.push(Term {
                name: name.to_string(),
                term_id: id,
            });
        }
        Ok(dictionary)
    }

    fn search(&self, name: &str) -> std::result::Result<usize, usize> {
        self.terms
            .binary_search_by(|t| self.collation.compare(&t.name, name))
    }

    fn collision(&self, term_id: TermId, incoming: &str) -> Error {
        let existing = self
            .terms
            .iter()
            .find(|t| t.term_id == term_id)
            .map(|t| t.name.clone())
            .unwrap_or_default();
        Error::DuplicateTermIdCollision {
            term_id,
            existing,
            incoming: incoming.to_string(),
        }
    }
}

/// Splits a dictionary line at its first space. The name may itself contain spaces.
pub(crate) fn parse_dictionary_line(line: &str) -> Option<(TermId, &str)> {
    let (id, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }
    Some((id.parse().ok()?, name))
}

/// Character n-grams of `$word$`. A word shorter than the window yields the
/// whole marked word as its single gram.
pub fn n_grams(word: &str, k: usize) -> Vec<String> {
    if word.is_empty() || k == 0 {
        return Vec::new();
    }
    let marked: Vec<char> = iter::once(NGRAM_BOUNDARY)
        .chain(word.chars())
        .chain(iter::once(NGRAM_BOUNDARY))
        .collect();
    windows(&marked, k)
}

/// N-grams of `$prefix`: every gram a word starting with `prefix` must contain.
pub fn prefix_n_grams(prefix: &str, k: usize) -> Vec<String> {
    if prefix.is_empty() || k == 0 {
        return Vec::new();
    }
    let marked: Vec<char> = iter::once(NGRAM_BOUNDARY).chain(prefix.chars()).collect();
    if marked.len() < k {
        // too short to pin down a full gram
        return Vec::new();
    }
    windows(&marked, k)
}

fn windows(chars: &[char], k: usize) -> Vec<String> {
    if chars.len() < k {
        return vec![chars.iter().collect()];
    }
    chars.windows(k).map(|w| w.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> TermDictionary {
        let mut d = TermDictionary::new(Collation::Binary);
        for w in ["dog", "cat", "catalog", "new york", "car"] {
            d.insert(w).unwrap();
        }
        d
    }

    #[test]
    fn keeps_sorted_order() {
        let d = sample();
        let names: Vec<&str> = d.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["car", "cat", "catalog", "dog", "new york"]);
        assert_eq!(d.get_word_index("dog"), Some(3));
        assert_eq!(d.get_word_index("cow"), None);
    }

    #[test]
    fn readding_same_term_is_idempotent() {
        let mut d = sample();
        let id = term_id("cat");
        assert_eq!(d.add_term("cat", id).unwrap(), 1);
        assert_eq!(d.len(), 5);
    }

    #[test]
    fn same_name_different_id_is_a_collision() {
        let mut d = sample();
        let err = d.add_term("cat", 7).unwrap_err();
        assert!(matches!(err, Error::DuplicateTermIdCollision { .. }));
    }

    #[test]
    fn shared_id_between_names_is_a_collision() {
        let mut d = TermDictionary::new(Collation::Binary);
        d.add_term("alpha", 42).unwrap();
        match d.add_term("beta", 42).unwrap_err() {
            Error::DuplicateTermIdCollision { existing, incoming, .. } => {
                assert_eq!(existing, "alpha");
                assert_eq!(incoming, "beta");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn prefix_lookup() {
        let d = sample();
        assert_eq!(d.get_word_starting_with("ca"), Some(0));
        assert_eq!(d.get_word_starting_with("cat"), Some(1));
        assert_eq!(d.get_word_starting_with("do"), Some(3));
        assert_eq!(d.get_word_starting_with("x"), None);
        let run: Vec<&str> = d.words_starting_with("cat").map(|(_, t)| t.name.as_str()).collect();
        assert_eq!(run, vec!["cat", "catalog"]);
    }

    #[test]
    fn case_insensitive_prefix_run() {
        let mut d = TermDictionary::new(Collation::CaseInsensitive);
        for w in ["Cat", "cat", "CATALOG", "dog"] {
            d.insert(w).unwrap();
        }
        let run: Vec<&str> = d.words_starting_with("cat").map(|(_, t)| t.name.as_str()).collect();
        assert_eq!(run, vec!["Cat", "cat", "CATALOG"]);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dictionary.txt");
        let d = sample();
        d.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.lines().last().unwrap().ends_with(" new york"));
        let loaded = TermDictionary::load(&path, Collation::Binary).unwrap();
        assert_eq!(loaded, d);
    }

    #[test]
    fn load_rejects_unsorted_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dictionary.txt");
        std::fs::write(&path, format!("{} dog\n{} cat\n", term_id("dog"), term_id("cat"))).unwrap();
        let err = TermDictionary::load(&path, Collation::Binary).unwrap_err();
        assert!(matches!(err, Error::MalformedIndexFile { line: 2, .. }));
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dictionary.txt");
        std::fs::write(&path, "not-a-number cat\n").unwrap();
        assert!(matches!(
            TermDictionary::load(&path, Collation::Binary),
            Err(Error::MalformedIndexFile { line: 1, .. })
        ));
    }

    #[test]
    fn bigrams_of_cat() {
        assert_eq!(n_grams("cat", 2), vec!["$c", "ca", "at", "t$"]);
        assert_eq!(n_grams("cat", 3), vec!["$ca", "cat", "at$"]);
        assert_eq!(n_grams("a", 3), vec!["$a$"]);
        assert_eq!(prefix_n_grams("ca", 2), vec!["$c", "ca"]);
    }

    #[test]
    fn construct_n_grams_links_back_to_word() {
        let mut grams = TermDictionary::new(Collation::Binary);
        let mut index = InvertedIndex::new();
        let cat = term_id("cat");
        grams.construct_n_grams("cat", cat, 2, &mut index).unwrap();
        assert_eq!(grams.len(), 4);
        for gram in ["$c", "ca", "at", "t$"] {
            let id = grams.get_term_id(gram).unwrap();
            assert_eq!(index.postings(id), &[cat]);
        }
    }
}
