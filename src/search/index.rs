//! Semantic index: ordered ids plus per-backend vectors
//!
//! Persisted as one of two artifact families under a path prefix:
//!
//! - dense: `<prefix>.ann` (bincode: ids, [`FlatIpIndex`]), `<prefix>.ids.json`,
//!   `<prefix>.meta.json` (`{"backend": "dense", "model": ...}`)
//! - sparse: `<prefix>.sparse.bin` (bincode: ids, vectorizer, CSR matrix)
//!
//! All artifacts of a save are staged as `.tmp` siblings before any of them
//! is renamed into place. The `.ann` payload repeats the ids, so a dense
//! family mixed from two saves fails to load as corrupt.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ann::{top_k, FlatIpIndex};
use super::backend::{BackendKind, VectorizerBackend};
use super::embedding::Embedder;
use super::error::{IndexError, Result};
use super::sparse::{CharNgramTfidf, SparseMatrix};
use crate::core::paths::IndexPaths;

const DENSE_FORMAT: &str = "recsearch-dense";
const DENSE_VERSION: u32 = 1;
const SPARSE_FORMAT: &str = "recsearch-sparse";
const SPARSE_VERSION: u32 = 1;

/// Which artifact family exists for a prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFamily {
    Dense,
    Sparse,
}

/// Probe the dense artifact first, then the sparse one
pub fn detect_artifacts(prefix: impl AsRef<Path>) -> Result<ArtifactFamily> {
    let paths = IndexPaths::from_prefix(prefix);
    if paths.ann.is_file() {
        Ok(ArtifactFamily::Dense)
    } else if paths.sparse.is_file() {
        Ok(ArtifactFamily::Sparse)
    } else {
        Err(IndexError::NotFound(paths.prefix))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DenseMeta {
    backend: BackendKind,
    model: Option<String>,
}

#[derive(Serialize)]
struct DenseArtifactRef<'a> {
    format: &'a str,
    version: u32,
    ids: &'a [i64],
    ann: &'a FlatIpIndex,
}

#[derive(Deserialize)]
struct DenseArtifact {
    format: String,
    version: u32,
    ids: Vec<i64>,
    ann: FlatIpIndex,
}

#[derive(Serialize)]
struct SparseArtifactRef<'a> {
    format: &'a str,
    version: u32,
    ids: &'a [i64],
    vectorizer: &'a CharNgramTfidf,
    matrix: &'a SparseMatrix,
}

#[derive(Deserialize)]
struct SparseArtifact {
    format: String,
    version: u32,
    ids: Vec<i64>,
    vectorizer: CharNgramTfidf,
    matrix: SparseMatrix,
}

enum VectorStore {
    Dense {
        ann: FlatIpIndex,
        embedder: Arc<dyn Embedder>,
    },
    Sparse {
        vectorizer: CharNgramTfidf,
        matrix: SparseMatrix,
    },
}

/// Immutable, fitted index; row `i` belongs to `ids()[i]`
pub struct SemanticIndex {
    ids: Vec<i64>,
    model: Option<String>,
    store: VectorStore,
}

impl std::fmt::Debug for SemanticIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticIndex")
            .field("backend", &self.backend())
            .field("model", &self.model)
            .field("len", &self.ids.len())
            .finish()
    }
}

impl SemanticIndex {
    pub(crate) fn from_dense(ids: Vec<i64>, embedder: Arc<dyn Embedder>, ann: FlatIpIndex) -> Self {
        Self {
            ids,
            model: Some(embedder.model_name().to_string()),
            store: VectorStore::Dense { ann, embedder },
        }
    }

    pub(crate) fn from_sparse(ids: Vec<i64>, vectorizer: CharNgramTfidf, matrix: SparseMatrix) -> Self {
        Self {
            ids,
            model: None,
            store: VectorStore::Sparse { vectorizer, matrix },
        }
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn backend(&self) -> BackendKind {
        match self.store {
            VectorStore::Dense { .. } => BackendKind::Dense,
            VectorStore::Sparse { .. } => BackendKind::Sparse,
        }
    }

    /// Embedding model that produced the vectors (dense only)
    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Top `topk` ids for `query`, best first
    ///
    /// A blank query returns the first `topk` ids in build order, unranked.
    pub fn search(&self, query: &str, topk: usize) -> Result<Vec<i64>> {
        Ok(self
            .search_scored(query, topk)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Like [`search`](Self::search), with cosine scores (0 for blank queries)
    pub fn search_scored(&self, query: &str, topk: usize) -> Result<Vec<(i64, f32)>> {
        let k = topk.min(self.ids.len());
        let query = query.trim();
        if query.is_empty() {
            return Ok(self.ids[..k].iter().map(|&id| (id, 0.0)).collect());
        }

        let hits = match &self.store {
            VectorStore::Dense { ann, embedder } => ann.search(&embedder.embed(query)?, k),
            VectorStore::Sparse { vectorizer, matrix } => {
                let scores = matrix.scores(&vectorizer.transform(query));
                top_k(&scores, k)
                    .into_iter()
                    .map(|row| (row, scores[row]))
                    .collect()
            }
        };

        Ok(hits
            .into_iter()
            .map(|(row, score)| (self.ids[row], score))
            .collect())
    }

    /// Persist under `prefix`, replacing artifacts of either family
    pub fn save(&self, prefix: impl AsRef<Path>) -> Result<()> {
        let paths = IndexPaths::from_prefix(prefix);
        if let Some(dir) = paths.parent_dir() {
            fs::create_dir_all(dir)?;
        }

        match &self.store {
            VectorStore::Dense { ann, .. } => {
                let meta = DenseMeta {
                    backend: BackendKind::Dense,
                    model: self.model.clone(),
                };
                let artifact = DenseArtifactRef {
                    format: DENSE_FORMAT,
                    version: DENSE_VERSION,
                    ids: &self.ids,
                    ann,
                };
                commit_all(&[
                    (&paths.ids, serde_json::to_vec(&self.ids).map_err(io::Error::other)?),
                    (&paths.meta, serde_json::to_vec(&meta).map_err(io::Error::other)?),
                    (&paths.ann, bincode::serialize(&artifact).map_err(io::Error::other)?),
                ])?;
                remove_if_exists(&paths.sparse)?;
            }
            VectorStore::Sparse { vectorizer, matrix } => {
                let artifact = SparseArtifactRef {
                    format: SPARSE_FORMAT,
                    version: SPARSE_VERSION,
                    ids: &self.ids,
                    vectorizer,
                    matrix,
                };
                let bytes = bincode::serialize(&artifact).map_err(io::Error::other)?;
                commit_all(&[(&paths.sparse, bytes)])?;
                // Probe artifact first so a half-removed family is never detected
                for path in paths.dense_artifacts().into_iter().rev() {
                    remove_if_exists(path)?;
                }
            }
        }

        info!("Saved {} index to {}", self.backend(), paths.prefix.display());
        Ok(())
    }

    /// Load whichever family exists under `prefix`
    ///
    /// Dense indexes re-load their embedding model through `backend`.
    pub fn load(prefix: impl AsRef<Path>, backend: &VectorizerBackend) -> Result<Self> {
        let paths = IndexPaths::from_prefix(prefix);
        let index = match detect_artifacts(&paths.prefix)? {
            ArtifactFamily::Dense => load_dense(&paths, backend)?,
            ArtifactFamily::Sparse => load_sparse(&paths)?,
        };
        debug!(
            "Loaded {} index ({} ids) from {}",
            index.backend(),
            index.len(),
            paths.prefix.display()
        );
        Ok(index)
    }
}

fn load_dense(paths: &IndexPaths, backend: &VectorizerBackend) -> Result<SemanticIndex> {
    let meta = if paths.meta.is_file() {
        let meta: DenseMeta = serde_json::from_slice(&fs::read(&paths.meta)?)
            .map_err(|e| IndexError::corrupt(&paths.meta, e))?;
        if meta.backend != BackendKind::Dense {
            return Err(IndexError::corrupt(
                &paths.meta,
                format!("metadata names the {} backend next to a dense artifact", meta.backend),
            ));
        }
        meta
    } else {
        DenseMeta {
            backend: BackendKind::Dense,
            model: None,
        }
    };

    let ids = read_existing(&paths.ids)?;
    let ids: Vec<i64> =
        serde_json::from_slice(&ids).map_err(|e| IndexError::corrupt(&paths.ids, e))?;

    let artifact: DenseArtifact = bincode::deserialize(&fs::read(&paths.ann)?)
        .map_err(|e| IndexError::corrupt(&paths.ann, e))?;
    if artifact.format != DENSE_FORMAT || artifact.version != DENSE_VERSION {
        return Err(IndexError::corrupt(
            &paths.ann,
            format!("unsupported format {} v{}", artifact.format, artifact.version),
        ));
    }
    let ann = artifact.ann;
    ann.validate().map_err(|e| IndexError::corrupt(&paths.ann, e))?;
    if ann.len() != artifact.ids.len() {
        return Err(IndexError::corrupt(
            &paths.ann,
            format!("{} vectors for {} ids", ann.len(), artifact.ids.len()),
        ));
    }
    if ids != artifact.ids {
        return Err(IndexError::corrupt(
            &paths.ids,
            "ids do not match the vector artifact",
        ));
    }

    let embedder = match meta.model.as_deref() {
        Some(model) => backend.embedder_for(model)?,
        None => backend.embedder_for(backend.model().ok_or_else(|| {
            IndexError::BackendUnavailable("dense index has no model and no dense backend is active".into())
        })?)?,
    };
    if embedder.dimension() != ann.dimension() {
        return Err(IndexError::corrupt(
            &paths.ann,
            format!(
                "model {} has dimension {}, index has {}",
                embedder.model_name(),
                embedder.dimension(),
                ann.dimension()
            ),
        ));
    }

    Ok(SemanticIndex::from_dense(ids, embedder, ann))
}

fn load_sparse(paths: &IndexPaths) -> Result<SemanticIndex> {
    let bytes = fs::read(&paths.sparse)?;
    let artifact: SparseArtifact =
        bincode::deserialize(&bytes).map_err(|e| IndexError::corrupt(&paths.sparse, e))?;

    if artifact.format != SPARSE_FORMAT || artifact.version != SPARSE_VERSION {
        return Err(IndexError::corrupt(
            &paths.sparse,
            format!("unsupported format {} v{}", artifact.format, artifact.version),
        ));
    }
    artifact
        .vectorizer
        .validate()
        .and_then(|_| artifact.matrix.validate())
        .map_err(|e| IndexError::corrupt(&paths.sparse, e))?;
    if artifact.matrix.n_rows() != artifact.ids.len()
        || artifact.matrix.n_cols() != artifact.vectorizer.vocabulary_len()
    {
        return Err(IndexError::corrupt(
            &paths.sparse,
            format!(
                "{}x{} matrix for {} ids and {} terms",
                artifact.matrix.n_rows(),
                artifact.matrix.n_cols(),
                artifact.ids.len(),
                artifact.vectorizer.vocabulary_len()
            ),
        ));
    }

    Ok(SemanticIndex::from_sparse(
        artifact.ids,
        artifact.vectorizer,
        artifact.matrix,
    ))
}

/// A dense family member missing next to the probe artifact is corruption
fn read_existing(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => IndexError::corrupt(path, "missing artifact"),
        _ => IndexError::Io(e),
    })
}

/// Stage every file, then rename them into place in order
///
/// A failed staging write removes what was already staged and leaves the
/// live artifacts untouched.
fn commit_all(files: &[(&PathBuf, Vec<u8>)]) -> io::Result<()> {
    for (i, (path, bytes)) in files.iter().enumerate() {
        if let Err(e) = fs::write(IndexPaths::staging(path), bytes) {
            for (staged, _) in &files[..i] {
                let _ = fs::remove_file(IndexPaths::staging(staged));
            }
            return Err(e);
        }
    }
    for (path, _) in files {
        fs::rename(IndexPaths::staging(path), path)?;
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
