//! In-process graph store

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{traversal, GraphStore, RankedId, Relation, TraversalPattern};
use crate::error::StoreError;
use crate::index::{CodeElement, ElementId};
use crate::query::WeightedTerm;
use crate::similarity::SimilarityEdge;

#[derive(Default)]
pub struct InMemoryGraphStore {
    nodes: DashMap<ElementId, CodeElement>,
    edges: DashMap<(ElementId, ElementId), SimilarityEdge>,
    relations: DashSet<Relation>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// All edges ordered by `(a, b)`
    pub fn edges(&self) -> Vec<SimilarityEdge> {
        let mut edges: Vec<SimilarityEdge> = self.edges.iter().map(|e| e.value().clone()).collect();
        edges.sort_by(|x, y| x.a.cmp(&y.a).then_with(|| x.b.cmp(&y.b)));
        edges
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert_node(&self, element: &CodeElement) -> Result<(), StoreError> {
        self.nodes.insert(element.id.clone(), element.clone());
        Ok(())
    }

    async fn upsert_edge(&self, edge: &SimilarityEdge) -> Result<(), StoreError> {
        self.edges
            .insert((edge.a.clone(), edge.b.clone()), edge.clone());
        Ok(())
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<(), StoreError> {
        self.relations.insert(relation.clone());
        Ok(())
    }

    async fn query_by_traversal(
        &self,
        pattern: &TraversalPattern,
        terms: &[WeightedTerm],
        limit: usize,
    ) -> Result<Vec<RankedId>, StoreError> {
        let snapshot: Vec<CodeElement> = self.nodes.iter().map(|n| n.value().clone()).collect();
        Ok(traversal::rank(pattern, &snapshot, terms, limit))
    }

    async fn get_node(&self, id: &ElementId) -> Result<Option<CodeElement>, StoreError> {
        Ok(self.nodes.get(id).map(|n| n.value().clone()))
    }

    async fn load_nodes(&self) -> Result<Vec<CodeElement>, StoreError> {
        let mut nodes: Vec<CodeElement> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(nodes)
    }

    async fn similar_edges(
        &self,
        id: &ElementId,
        limit: usize,
    ) -> Result<Vec<SimilarityEdge>, StoreError> {
        let mut edges: Vec<SimilarityEdge> = self
            .edges
            .iter()
            .filter(|e| &e.a == id || &e.b == id)
            .map(|e| e.value().clone())
            .collect();
        edges.sort_by(|x, y| {
            y.combined_score
                .total_cmp(&x.combined_score)
                .then_with(|| x.other(id).cmp(y.other(id)))
        });
        edges.truncate(limit);
        Ok(edges)
    }

    async fn relations_from(&self, id: &ElementId) -> Result<Vec<Relation>, StoreError> {
        let mut relations: Vec<Relation> = self
            .relations
            .iter()
            .filter(|r| &r.source == id)
            .map(|r| r.key().clone())
            .collect();
        relations.sort();
        Ok(relations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::RelationKind;
    use crate::index::PythonParser;
    use crate::similarity::PairScore;

    fn extracted() -> Vec<CodeElement> {
        let mut parser = PythonParser::new().unwrap();
        parser
            .extract("m.py", "def a():\n    b()\n\ndef b():\n    return 1\n")
            .unwrap()
            .elements
    }

    fn edge(x: &CodeElement, y: &CodeElement, combined: f32) -> SimilarityEdge {
        SimilarityEdge::new(
            &x.id,
            &y.id,
            PairScore {
                structural: combined,
                embedding: None,
                combined,
            },
        )
    }

    #[tokio::test]
    async fn test_upserts_are_idempotent() {
        let store = InMemoryGraphStore::new();
        let elements = extracted();
        for _ in 0..2 {
            for e in &elements {
                store.upsert_node(e).await.unwrap();
                for r in Relation::for_element(e) {
                    store.upsert_relation(&r).await.unwrap();
                }
            }
            store
                .upsert_edge(&edge(&elements[1], &elements[2], 0.8))
                .await
                .unwrap();
        }
        assert_eq!(store.node_count(), elements.len());
        assert_eq!(store.edge_count(), 1);
        let relations_once: usize = elements.iter().map(|e| Relation::for_element(e).len()).sum();
        assert_eq!(store.relation_count(), relations_once);
    }

    #[tokio::test]
    async fn test_similar_edges_ordered() {
        let store = InMemoryGraphStore::new();
        let elements = extracted();
        store
            .upsert_edge(&edge(&elements[1], &elements[0], 0.5))
            .await
            .unwrap();
        store
            .upsert_edge(&edge(&elements[1], &elements[2], 0.9))
            .await
            .unwrap();
        let edges = store.similar_edges(&elements[1].id, 10).await.unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].combined_score, 0.9);
        assert_eq!(store.similar_edges(&elements[1].id, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_and_relations() {
        let store = InMemoryGraphStore::new();
        let elements = extracted();
        for e in &elements {
            store.upsert_node(e).await.unwrap();
            for r in Relation::for_element(e) {
                store.upsert_relation(&r).await.unwrap();
            }
        }
        let a = store.get_node(&elements[1].id).await.unwrap().unwrap();
        assert_eq!(a.name, "a");
        assert!(store.get_node(&ElementId::from("nope")).await.unwrap().is_none());
        let relations = store.relations_from(&a.id).await.unwrap();
        assert!(relations.iter().any(|r| r.kind == RelationKind::Calls));
    }
}
