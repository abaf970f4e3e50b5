//! Graph store
//!
//! - `traversal` - Pattern inference and term-weighted ranking
//! - `memory` - In-process store on dashmap
//! - `sqlite` - Persistent store on rusqlite

pub mod memory;
pub mod sqlite;
pub mod traversal;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::index::{CodeElement, ElementId, ElementKind};
use crate::query::{QueryExpansion, WeightedTerm};
use crate::similarity::SimilarityEdge;

pub use memory::InMemoryGraphStore;
pub use sqlite::SqliteGraphStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    DefinedIn,
    Calls,
    Imports,
    InheritsFrom,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefinedIn => "defined_in",
            Self::Calls => "calls",
            Self::Imports => "imports",
            Self::InheritsFrom => "inherits_from",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "defined_in" => Some(Self::DefinedIn),
            "calls" => Some(Self::Calls),
            "imports" => Some(Self::Imports),
            "inherits_from" => Some(Self::InheritsFrom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationTarget {
    Element(ElementId),
    /// Unresolved or outside the repository
    External(String),
}

impl RelationTarget {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Element(id) => id.as_str(),
            Self::External(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub source: ElementId,
    pub target: RelationTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Relation {
    /// All relations sourced at `element`
    pub fn for_element(element: &CodeElement) -> Vec<Relation> {
        let mut out = Vec::new();

        if let Some(parent) = &element.contained_by {
            out.push(Relation {
                kind: RelationKind::DefinedIn,
                source: element.id.clone(),
                target: RelationTarget::Element(parent.clone()),
                line: None,
            });
        }

        for call in &element.calls {
            let target = match &call.resolved {
                Some(id) => RelationTarget::Element(id.clone()),
                None => RelationTarget::External(call.target.clone()),
            };
            out.push(Relation {
                kind: RelationKind::Calls,
                source: element.id.clone(),
                target,
                line: Some(call.line),
            });
        }

        for import in &element.imports {
            out.push(Relation {
                kind: RelationKind::Imports,
                source: element.id.clone(),
                target: RelationTarget::External(import.target()),
                line: Some(import.line),
            });
        }

        for base in &element.bases {
            out.push(Relation {
                kind: RelationKind::InheritsFrom,
                source: element.id.clone(),
                target: RelationTarget::External(base.clone()),
                line: Some(element.line_start),
            });
        }

        out
    }
}

/// How a query walks the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraversalPattern {
    /// Functions and methods with matching call sites
    Calls,
    /// Functions and methods, to be paired with their similarity edges
    Similar,
    /// Methods grouped under matching classes
    ClassMethods,
    /// Modules with matching imports
    Imports,
    /// Plain element match; empty `kinds` means any kind
    Elements { kinds: BTreeSet<ElementKind> },
}

impl TraversalPattern {
    pub fn infer(expansion: &QueryExpansion) -> Self {
        let text = expansion.original_text.to_lowercase();
        if text.contains("function") && text.contains("call") {
            Self::Calls
        } else if text.contains("similar") && text.contains("function") {
            Self::Similar
        } else if text.contains("class") && text.contains("method") {
            Self::ClassMethods
        } else if text.contains("import") {
            Self::Imports
        } else {
            Self::Elements {
                kinds: expansion.inferred_kind_hints.clone(),
            }
        }
    }

    pub fn all_elements() -> Self {
        Self::Elements {
            kinds: BTreeSet::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Similar => "similar",
            Self::ClassMethods => "class_methods",
            Self::Imports => "imports",
            Self::Elements { .. } => "elements",
        }
    }
}

/// A ranked traversal result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedId {
    pub id: ElementId,
    pub score: f32,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap reachability check made before a run
    async fn ping(&self) -> Result<(), StoreError>;

    /// Insert or replace by id
    async fn upsert_node(&self, element: &CodeElement) -> Result<(), StoreError>;

    /// Insert or replace by `(a, b)`
    async fn upsert_edge(&self, edge: &SimilarityEdge) -> Result<(), StoreError>;

    /// Insert unless an identical relation exists
    async fn upsert_relation(&self, relation: &Relation) -> Result<(), StoreError>;

    async fn query_by_traversal(
        &self,
        pattern: &TraversalPattern,
        terms: &[WeightedTerm],
        limit: usize,
    ) -> Result<Vec<RankedId>, StoreError>;

    async fn get_node(&self, id: &ElementId) -> Result<Option<CodeElement>, StoreError>;

    /// Every stored element, ordered by id
    async fn load_nodes(&self) -> Result<Vec<CodeElement>, StoreError>;

    /// Edges touching `id`, best first
    async fn similar_edges(
        &self,
        id: &ElementId,
        limit: usize,
    ) -> Result<Vec<SimilarityEdge>, StoreError>;

    /// Relations whose source is `id`
    async fn relations_from(&self, id: &ElementId) -> Result<Vec<Relation>, StoreError>;
}

/// Open the store named in config
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn GraphStore>, StoreError> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryGraphStore::new())),
        StoreBackend::Sqlite => Ok(Arc::new(SqliteGraphStore::open(&config.resolved_path())?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExpansionConfig;
    use crate::query::QueryExpander;

    fn pattern_for(text: &str) -> TraversalPattern {
        let expander = QueryExpander::new(&ExpansionConfig::default());
        TraversalPattern::infer(&expander.expand(text))
    }

    #[test]
    fn test_pattern_routing() {
        assert_eq!(pattern_for("which functions call save"), TraversalPattern::Calls);
        assert_eq!(
            pattern_for("functions similar to parse_args"),
            TraversalPattern::Similar
        );
        assert_eq!(
            pattern_for("methods of class Session"),
            TraversalPattern::ClassMethods
        );
        assert_eq!(pattern_for("who imports json"), TraversalPattern::Imports);
        match pattern_for("class for sessions") {
            TraversalPattern::Elements { kinds } => {
                assert_eq!(kinds.into_iter().collect::<Vec<_>>(), vec![ElementKind::Class]);
            }
            other => panic!("unexpected pattern {other:?}"),
        }
    }

    #[test]
    fn test_relation_kind_round_trip_names() {
        for kind in [
            RelationKind::DefinedIn,
            RelationKind::Calls,
            RelationKind::Imports,
            RelationKind::InheritsFrom,
        ] {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
    }
}
