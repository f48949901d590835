use std::path::PathBuf;

use thiserror::Error;

use crate::core::source::SourceError;

/// Failures surfaced by the retrieval engine
///
/// Backend-selection and vocabulary-retry problems are recovered inside
/// the vectorizer backend and only show up here once recovery failed.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No index has been built or loaded yet
    #[error("Semantic index is not ready (no index built or loaded)")]
    NotReady,

    /// Neither dense nor sparse artifacts exist for the prefix
    #[error("No index artifacts found for prefix {0}")]
    NotFound(PathBuf),

    /// A persisted artifact could not be parsed or is inconsistent
    #[error("Persisted index is corrupt ({path}): {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Sparse fitting yielded no usable terms, even with looser n-grams
    #[error("Corpus yields no usable vocabulary")]
    DegenerateVocabulary,

    /// The dense embedding capability cannot be loaded
    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Embedding generation failed after the backend was loaded
    #[error("Failed to generate embeddings: {0}")]
    Embedding(String),

    /// A build for this index is already running
    #[error("An index build is already in progress")]
    BuildInProgress,

    #[error("Record source error: {0}")]
    Source(#[from] SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IndexError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
