//! record-search library
//!
//! Hybrid semantic retrieval over structured records.
//!
//! # Modules
//!
//! - `core`: Record model, record sources (files, SQLite), structured filters, config
//! - `search`: Corpus building, vectorizer backends, persisted index, hybrid retrieval

pub mod core;
pub mod search;

// Re-exports for convenience
pub use core::config::Config;
pub use core::filter::{Clause, Condition, PredicateFilter, StructuredFilter};
pub use core::record::{Field, FieldManifest, FieldValue, Record};
pub use core::source::{FileRecordSource, MemorySource, RecordSource, SourceError};
pub use core::sqlite::{SqlFilter, SqliteRecordSource};
pub use search::{
    HybridRetriever, IndexBuilder, IndexError, IndexOutcome, SemanticIndex, SharedIndex,
    VectorizerBackend,
};
