//! Python code indexing
//!
//! Turns source files into graph-ready code elements.
//!
//! Key components:
//! - `element` - Code elements, ids, signatures, imports, call references
//! - `parser` - AST-based extraction via tree-sitter
//! - `normalize` - Comment/whitespace normalization and content hashing
//! - `fingerprint` - Identifier-insensitive structural fingerprints
//! - `resolve` - Cross-file call resolution
//! - `indexer` - Orchestrates an indexing run

pub mod element;
pub mod fingerprint;
pub mod indexer;
pub mod normalize;
pub mod parser;
pub mod resolve;

pub use element::{
    CallRef, CodeElement, ElementId, ElementKind, FileExtraction, ImportRecord, ParamKind,
    Parameter, Signature,
};
pub use fingerprint::{FingerprintBuilder, NodeCategory, StructuralFingerprint};
pub use indexer::{IndexPhase, IndexProgress, Indexer, RunSummary, SourceFile};
pub use parser::PythonParser;
pub use resolve::{resolve_calls, ResolutionStats};
