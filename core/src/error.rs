use std::path::PathBuf;

use crate::TermId;

/// Errors raised while building, persisting or querying a collection.
///
/// Unknown query terms are not errors: searches fold them into empty
/// postings or zero weight.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An index or dictionary file is missing a field, out of order or otherwise unreadable.
    #[error("malformed index file {path}:{line}: {reason}")]
    MalformedIndexFile {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// Two distinct terms share a term ID, or one term was offered with two IDs.
    #[error("term id {term_id} collision: {existing:?} vs {incoming:?}")]
    DuplicateTermIdCollision {
        term_id: TermId,
        existing: String,
        incoming: String,
    },

    #[error("invalid retrieval type: {0}")]
    InvalidRetrievalType(String),

    #[error("invalid focus type: {0}")]
    InvalidFocusType(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A precomputation pass has not run yet.
    #[error("index not prepared: {0}")]
    IndexNotPrepared(&'static str),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Error::MalformedIndexFile {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }
}
