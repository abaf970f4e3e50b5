//! Query side
//!
//! - `expander` - Free text to weighted terms and kind hints
//! - `synonyms` - Injectable code-vocabulary synonym table
//! - `retrieval` - Traversal + embedding search fused by reciprocal rank

pub mod expander;
pub mod retrieval;
pub mod synonyms;

pub use expander::{QueryExpander, QueryExpansion, TermOrigin, WeightedTerm};
pub use retrieval::{RetrievalHit, RetrievalOutcome, Retriever};
pub use synonyms::SynonymTable;
