//! Vectorizer backend selection and fitting

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ann::FlatIpIndex;
use super::corpus::CorpusEntry;
use super::embedding::{load_embedder, Embedder, DEFAULT_DENSE_MODEL};
use super::error::{IndexError, Result};
use super::index::SemanticIndex;
use super::sparse::CharNgramTfidf;

/// Vectorization strategy recorded with every index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Sentence embeddings searched by inner product
    #[serde(alias = "sbert")]
    Dense,
    /// Character n-gram TF-IDF searched by cosine similarity
    #[serde(alias = "tfidf")]
    Sparse,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Dense => write!(f, "dense"),
            BackendKind::Sparse => write!(f, "sparse"),
        }
    }
}

/// The backend chosen for this process
///
/// Construct once at start with [`VectorizerBackend::select`] and pass it by
/// reference. The choice never changes afterwards: a backend that fell back
/// to sparse does not retry the dense path.
#[derive(Clone)]
pub struct VectorizerBackend {
    embedder: Option<Arc<dyn Embedder>>,
}

impl fmt::Debug for VectorizerBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorizerBackend")
            .field("kind", &self.kind())
            .field("model", &self.model())
            .finish()
    }
}

impl VectorizerBackend {
    /// Try the dense model first, fall back to sparse if it cannot load
    pub fn select(preferred_model: Option<&str>) -> Self {
        let model = preferred_model.unwrap_or(DEFAULT_DENSE_MODEL);
        match load_embedder(model) {
            Ok(embedder) => {
                info!("Using dense backend with model {}", embedder.model_name());
                Self::dense(embedder)
            }
            Err(IndexError::BackendUnavailable(reason)) => {
                info!("Dense backend unavailable ({}), using sparse backend", reason);
                Self::sparse()
            }
            Err(e) => {
                info!("Failed to load model {} ({}), using sparse backend", model, e);
                Self::sparse()
            }
        }
    }

    /// Dense backend around an already loaded embedder
    pub fn dense(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder: Some(embedder),
        }
    }

    /// Sparse backend, dense path never attempted
    pub fn sparse() -> Self {
        Self { embedder: None }
    }

    pub fn kind(&self) -> BackendKind {
        if self.embedder.is_some() {
            BackendKind::Dense
        } else {
            BackendKind::Sparse
        }
    }

    /// Dense model id, `None` for sparse
    pub fn model(&self) -> Option<&str> {
        self.embedder.as_ref().map(|e| e.model_name())
    }

    /// Fit an index over `corpus`; an empty corpus builds nothing
    pub fn fit(&self, corpus: &[CorpusEntry]) -> Result<Option<SemanticIndex>> {
        if corpus.is_empty() {
            debug!("Empty corpus, no index built");
            return Ok(None);
        }

        let start = Instant::now();
        let ids: Vec<i64> = corpus.iter().map(|e| e.id).collect();
        let texts: Vec<&str> = corpus.iter().map(|e| e.text.as_str()).collect();

        let index = match &self.embedder {
            Some(embedder) => fit_dense(ids, &texts, Arc::clone(embedder))?,
            None => {
                let (vectorizer, matrix) = CharNgramTfidf::fit(&texts)?;
                SemanticIndex::from_sparse(ids, vectorizer, matrix)
            }
        };

        info!(
            "Fitted {} index over {} entries in {:?}",
            index.backend(),
            index.len(),
            start.elapsed()
        );
        Ok(Some(index))
    }

    /// Embedder for a persisted dense index, reusing the loaded one when
    /// the model matches
    pub(crate) fn embedder_for(&self, model: &str) -> Result<Arc<dyn Embedder>> {
        match &self.embedder {
            Some(embedder) if embedder.model_name() == model => Ok(Arc::clone(embedder)),
            _ => load_embedder(model),
        }
    }
}

fn fit_dense(ids: Vec<i64>, texts: &[&str], embedder: Arc<dyn Embedder>) -> Result<SemanticIndex> {
    let vectors = embedder.embed_batch(texts)?;
    if vectors.len() != texts.len() {
        return Err(IndexError::Embedding(format!(
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        )));
    }

    let mut ann = FlatIpIndex::new(embedder.dimension());
    for vector in &vectors {
        ann.add(vector).map_err(IndexError::Embedding)?;
    }
    Ok(SemanticIndex::from_dense(ids, embedder, ann))
}
