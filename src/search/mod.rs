//! Semantic retrieval engine
//!
//! Records are flattened into corpus blobs, vectorized by the backend
//! chosen at start (dense embeddings or sparse character n-grams), and
//! searched by cosine similarity. Structured filters narrow the ranking
//! without reordering it.

pub mod ann;
pub mod backend;
pub mod builder;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod hybrid;
pub mod index;
pub mod sparse;

pub use backend::{BackendKind, VectorizerBackend};
pub use builder::{IndexBuilder, IndexOutcome, OutcomeKind, SharedIndex};
pub use corpus::{build_blob, build_corpus, CorpusEntry};
pub use embedding::{Embedder, HarmonicEmbedder};
pub use error::IndexError;
pub use hybrid::HybridRetriever;
pub use index::{detect_artifacts, ArtifactFamily, SemanticIndex};
