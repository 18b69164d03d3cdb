//! Document metadata and the loader interfaces the builder consumes.

use serde::{Deserialize, Serialize};

use crate::category::{CategoryId, CategoryTree};
use crate::dictionary::Term;
use crate::error::Result;
use crate::tokenizer::tokenize;
use crate::DocId;

/// Which dictionary a loader pass feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermType {
    Token,
    Phrase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermOccurrence {
    pub term: Term,
    pub doc_id: DocId,
    pub position: u32,
}

/// Source of one document's term occurrences, in position order.
pub trait DocumentLoader: Send + Sync {
    fn get_doc_id(&self) -> DocId;

    /// External identifier kept in the document table.
    fn get_name(&self) -> String {
        self.get_doc_id().to_string()
    }

    fn load_document(&self, term_type: TermType) -> Result<Vec<TermOccurrence>>;
}

/// Resolves a document's category, creating tree nodes as needed.
pub trait CategoryLoader {
    fn load_category(&self, tree: &mut CategoryTree) -> Option<CategoryId>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub doc_id: DocId,
    pub name: String,
    /// Token count, used for length normalization.
    pub size: u32,
    pub category: Option<CategoryId>,
}

impl DocumentMeta {
    pub fn new(doc_id: DocId, name: impl Into<String>, size: u32) -> Self {
        Self {
            doc_id,
            name: name.into(),
            size,
            category: None,
        }
    }
}

/// Document metadata kept sorted by doc ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTable {
    docs: Vec<DocumentMeta>,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the entry for `meta.doc_id`.
    pub fn push(&mut self, meta: DocumentMeta) {
        match self.docs.binary_search_by_key(&meta.doc_id, |d| d.doc_id) {
            Ok(i) => self.docs[i] = meta,
            Err(i) => self.docs.insert(i, meta),
        }
    }

    pub fn get(&self, doc_id: DocId) -> Option<&DocumentMeta> {
        self.docs
            .binary_search_by_key(&doc_id, |d| d.doc_id)
            .ok()
            .map(|i| &self.docs[i])
    }

    pub fn set_category(&mut self, doc_id: DocId, category: Option<CategoryId>) {
        if let Ok(i) = self.docs.binary_search_by_key(&doc_id, |d| d.doc_id) {
            self.docs[i].category = category;
        }
    }

    pub fn set_size(&mut self, doc_id: DocId, size: u32) {
        if let Ok(i) = self.docs.binary_search_by_key(&doc_id, |d| d.doc_id) {
            self.docs[i].size = size;
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentMeta> {
        self.docs.iter()
    }
}

/// Plain-text document run through the default tokenizer. Phrases are pairs
/// of adjacent tokens joined by a space.
#[derive(Debug, Clone)]
pub struct TextDocument {
    pub doc_id: DocId,
    pub name: String,
    pub text: String,
    /// Category path from the root, e.g. `["science", "physics"]`.
    pub category: Vec<String>,
}

impl TextDocument {
    pub fn new(doc_id: DocId, name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id,
            name: name.into(),
            text: text.into(),
            category: Vec::new(),
        }
    }

    /// Sets the category from a `/`-separated path.
    pub fn with_category(mut self, path: &str) -> Self {
        self.category = path
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        self
    }
}

impl DocumentLoader for TextDocument {
    fn get_doc_id(&self) -> DocId {
        self.doc_id
    }

    fn get_name(&self) -> String {
        self.name.clone()
    }

    fn load_document(&self, term_type: TermType) -> Result<Vec<TermOccurrence>> {
        let tokens = tokenize(&self.text);
        let occurrences = match term_type {
            TermType::Token => tokens
                .into_iter()
                .map(|(term, pos)| TermOccurrence {
                    term: Term::new(term),
                    doc_id: self.doc_id,
                    position: pos as u32,
                })
                .collect(),
            TermType::Phrase => tokens
                .windows(2)
                .filter(|pair| pair[1].1 == pair[0].1 + 1)
                .map(|pair| TermOccurrence {
                    term: Term::new(format!("{} {}", pair[0].0, pair[1].0)),
                    doc_id: self.doc_id,
                    position: pair[0].1 as u32,
                })
                .collect(),
        };
        Ok(occurrences)
    }
}

impl CategoryLoader for TextDocument {
    fn load_category(&self, tree: &mut CategoryTree) -> Option<CategoryId> {
        if self.category.is_empty() {
            return None;
        }
        Some(tree.insert_path(&self.category))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_stays_sorted() {
        let mut table = DocumentTable::new();
        table.push(DocumentMeta::new(9, "nine", 3));
        table.push(DocumentMeta::new(2, "two", 1));
        table.push(DocumentMeta::new(5, "five", 4));
        let ids: Vec<DocId> = table.iter().map(|d| d.doc_id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
        assert_eq!(table.get(5).unwrap().name, "five");
        assert!(table.get(3).is_none());
    }

    #[test]
    fn text_document_phrases_skip_gaps() {
        let doc = TextDocument::new(1, "d1", "quick brown fox and green dog");
        let tokens = doc.load_document(TermType::Token).unwrap();
        let names: Vec<&str> = tokens.iter().map(|o| o.term.name.as_str()).collect();
        assert_eq!(names, vec!["quick", "brown", "fox", "green", "dog"]);
        let phrases = doc.load_document(TermType::Phrase).unwrap();
        let names: Vec<&str> = phrases.iter().map(|o| o.term.name.as_str()).collect();
        // "and" is a stopword, so "fox" and "green" are not adjacent
        assert_eq!(names, vec!["quick brown", "brown fox", "green dog"]);
    }

    #[test]
    fn category_path_is_inserted() {
        let mut tree = CategoryTree::new();
        let doc = TextDocument::new(1, "d1", "text").with_category("science / physics");
        let id = doc.load_category(&mut tree).unwrap();
        assert_eq!(tree.name(id), "physics");
        assert!(TextDocument::new(2, "d2", "x").load_category(&mut tree).is_none());
    }
}
