//! Indexing and retrieval core.
//!
//! Documents arrive as ordered term occurrences from a [`DocumentLoader`] and
//! are folded into term dictionaries, postings lists, positional postings and
//! n-gram indexes, either in one in-memory pass or through bounded blocks that
//! are flushed to disk and k-way merged. A [`Collection`] owns the result and
//! answers boolean, phrase and ranked queries.

pub mod builder;
pub mod category;
pub mod collation;
pub mod collection;
pub mod dictionary;
pub mod documents;
pub mod error;
pub mod incidence;
pub mod intersect;
pub mod inverted;
pub mod merger;
pub mod ngram;
pub mod persist;
pub mod positional;
pub mod query;
pub mod tokenizer;

pub use builder::{BlockAccumulator, BlockFiles, BuildState, BuildStrategy, IndexBuilder, Pass};
pub use category::{CategoryId, CategoryNode, CategoryTree, DeterminationMode};
pub use collation::Collation;
pub use collection::{Collection, CollectionConfig};
pub use dictionary::{term_id, Term, TermDictionary};
pub use documents::{
    CategoryLoader, DocumentLoader, DocumentMeta, DocumentTable, TermOccurrence, TermType,
    TextDocument,
};
pub use error::{Error, Result};
pub use incidence::IncidenceMatrix;
pub use inverted::InvertedIndex;
pub use merger::IndexMerger;
pub use ngram::NGramIndex;
pub use positional::{DocumentWeighting, PositionalIndex, PositionalPosting, TermWeighting};
pub use query::{
    Attribute, FocusType, IndexType, Query, QueryResult, RetrievalType, ScoredDoc,
    SearchParameter,
};

pub type TermId = u64;
pub type DocId = u32;
