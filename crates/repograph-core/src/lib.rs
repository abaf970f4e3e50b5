//! Code knowledge graph core
//!
//! Key components:
//! - `index` - Python extraction, fingerprints, call resolution, run orchestration
//! - `embeddings` - Embedding providers, content-hash cache, bounded service
//! - `similarity` - Hybrid structural + embedding scoring and pair sweeps
//! - `query` - Query expansion and retrieval
//! - `graph` - Graph store interface with in-memory and SQLite stores
//! - `llm` - Completion client, prompt building, response cleanup

pub mod cancellation;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod index;
pub mod llm;
pub mod query;
pub mod retry;
pub mod similarity;

pub use cancellation::RunCancellation;
pub use config::RepographConfig;
pub use error::{
    ConfigError, EmbeddingUnavailable, ExtractionError, IndexError, StoreError, StoreWriteError,
};
pub use index::{CodeElement, ElementId, ElementKind, Indexer, RunSummary};
