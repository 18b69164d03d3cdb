//! Parsed queries, search parameters and results.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::category::DeterminationMode;
use crate::error::{Error, Result};
use crate::positional::{DocumentWeighting, TermWeighting};
use crate::DocId;

/// A named attribute whose value is matched as a term or phrase sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Multi-word values are looked up in the phrase dictionary.
    pub fn is_phrase(&self) -> bool {
        self.value.trim().contains(' ')
    }
}

/// An already parsed query. Terms and phrases are expected in indexed
/// (normalized) form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub terms: Vec<String>,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl Query {
    pub fn new<S: Into<String>>(terms: impl IntoIterator<Item = S>) -> Self {
        Self {
            terms: terms.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn with_phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrases.push(phrase.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(key, value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.phrases.is_empty() && self.attributes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetrievalType {
    #[default]
    Boolean,
    Positional,
    Ranked,
}

impl FromStr for RetrievalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "boolean" => Ok(RetrievalType::Boolean),
            "positional" => Ok(RetrievalType::Positional),
            "ranked" => Ok(RetrievalType::Ranked),
            _ => Err(Error::InvalidRetrievalType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexType {
    IncidenceMatrix,
    #[default]
    InvertedIndex,
}

impl FromStr for IndexType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incidence-matrix" => Ok(IndexType::IncidenceMatrix),
            "inverted-index" => Ok(IndexType::InvertedIndex),
            _ => Err(Error::InvalidParameter(format!("unknown index type: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusType {
    #[default]
    Plain,
    /// Restrict results to categories resolved from the query.
    Category,
}

impl FromStr for FocusType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(FocusType::Plain),
            "category" => Ok(FocusType::Category),
            _ => Err(Error::InvalidFocusType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParameter {
    pub retrieval_type: RetrievalType,
    pub index_type: IndexType,
    pub focus_type: FocusType,
    pub term_weighting: TermWeighting,
    pub document_weighting: DocumentWeighting,
    /// Divide ranked scores by the square root of the document size.
    pub normalize: bool,
    /// Ranked result cutoff.
    pub result_count: usize,
    pub determination_mode: DeterminationMode,
    /// Attribute keys treated as attributes; `None` accepts every key.
    pub attribute_filter: Option<Vec<String>>,
}

impl Default for SearchParameter {
    fn default() -> Self {
        Self {
            retrieval_type: RetrievalType::Boolean,
            index_type: IndexType::InvertedIndex,
            focus_type: FocusType::Plain,
            term_weighting: TermWeighting::Logarithmic,
            document_weighting: DocumentWeighting::Idf,
            normalize: true,
            result_count: 10,
            determination_mode: DeterminationMode::ExactMatch,
            attribute_filter: None,
        }
    }
}

impl SearchParameter {
    pub fn boolean() -> Self {
        Self::default()
    }

    pub fn positional() -> Self {
        Self {
            retrieval_type: RetrievalType::Positional,
            ..Self::default()
        }
    }

    pub fn ranked(result_count: usize) -> Self {
        Self {
            retrieval_type: RetrievalType::Ranked,
            result_count,
            ..Self::default()
        }
    }

    /// Rejects combinations no index can answer.
    pub fn validate(&self) -> Result<()> {
        if self.index_type == IndexType::IncidenceMatrix && self.retrieval_type != RetrievalType::Boolean {
            return Err(Error::InvalidRetrievalType(format!(
                "{:?} retrieval on an incidence matrix",
                self.retrieval_type
            )));
        }
        if self.retrieval_type == RetrievalType::Ranked && self.result_count == 0 {
            return Err(Error::InvalidParameter("result_count must be positive".into()));
        }
        Ok(())
    }

    pub fn accepts_attribute(&self, key: &str) -> bool {
        self.attribute_filter
            .as_ref()
            .map_or(true, |keys| keys.iter().any(|k| k == key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

/// Boolean and positional results are ordered by doc ID; ranked results by
/// descending score, then doc ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    items: Vec<ScoredDoc>,
}

impl QueryResult {
    pub fn from_items(items: Vec<ScoredDoc>) -> Self {
        Self { items }
    }

    /// Unscored result from sorted doc IDs.
    pub fn from_doc_ids(ids: Vec<DocId>) -> Self {
        Self {
            items: ids
                .into_iter()
                .map(|doc_id| ScoredDoc { doc_id, score: 1.0 })
                .collect(),
        }
    }

    pub fn items(&self) -> &[ScoredDoc] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ScoredDoc> {
        self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredDoc> {
        self.items.iter()
    }

    pub fn doc_ids(&self) -> Vec<DocId> {
        self.items.iter().map(|i| i.doc_id).collect()
    }

    /// Doc IDs in ascending order, whatever the result order.
    pub fn sorted_doc_ids(&self) -> Vec<DocId> {
        let mut ids = self.doc_ids();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn retain(&mut self, f: impl FnMut(&ScoredDoc) -> bool) {
        self.items.retain(f);
    }
}

impl FromIterator<ScoredDoc> for QueryResult {
    fn from_iter<I: IntoIterator<Item = ScoredDoc>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_retrieval_and_focus_types() {
        assert_eq!("ranked".parse::<RetrievalType>().unwrap(), RetrievalType::Ranked);
        assert!(matches!("fuzzy".parse::<RetrievalType>(), Err(Error::InvalidRetrievalType(_))));
        assert!(matches!("global".parse::<FocusType>(), Err(Error::InvalidFocusType(_))));
    }

    #[test]
    fn incidence_matrix_is_boolean_only() {
        let mut p = SearchParameter::ranked(5);
        assert!(p.validate().is_ok());
        p.index_type = IndexType::IncidenceMatrix;
        assert!(matches!(p.validate(), Err(Error::InvalidRetrievalType(_))));
        p.retrieval_type = RetrievalType::Boolean;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn attribute_filter() {
        let mut p = SearchParameter::default();
        assert!(p.accepts_attribute("author"));
        p.attribute_filter = Some(vec!["title".into()]);
        assert!(!p.accepts_attribute("author"));
        assert!(p.accepts_attribute("title"));
        assert!(Attribute::new("title", "new york").is_phrase());
    }

    #[test]
    fn parameter_json_defaults() {
        let p: SearchParameter = serde_json::from_str(r#"{"retrieval_type":"ranked","result_count":3}"#).unwrap();
        assert_eq!(p.retrieval_type, RetrievalType::Ranked);
        assert_eq!(p.result_count, 3);
        assert_eq!(p.document_weighting, DocumentWeighting::Idf);
    }
}
