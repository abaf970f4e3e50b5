//! End-to-end indexing runs against the in-memory and SQLite stores

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use repograph_core::config::{EmbeddingConfig, RepographConfig};
use repograph_core::embeddings::{EmbeddingProvider, EmbeddingService, HashingEmbeddingProvider};
use repograph_core::error::{EmbeddingUnavailable, IndexError, StoreError, StoreWriteError};
use repograph_core::graph::{
    GraphStore, InMemoryGraphStore, RankedId, Relation, SqliteGraphStore, TraversalPattern,
};
use repograph_core::index::fingerprint::structural_distance;
use repograph_core::index::{CodeElement, ElementId, ElementKind, Indexer, SourceFile};
use repograph_core::query::WeightedTerm;
use repograph_core::retry::RetryConfig;
use repograph_core::similarity::SimilarityEdge;

const TOTAL_A: &str = "\
def total(items):
    result = 0
    for item in items:
        if item > 0:
            result += item
    return result
";

const TOTAL_B: &str = "\
def total( items ):
    # sum positives
    result = 0
    for item in items:   # loop
        if item>0:
            result  +=  item
    return result
";

fn write(dir: &Path, relative: &str, text: &str) {
    let path = dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

fn hashing_service() -> EmbeddingService {
    let config = EmbeddingConfig {
        dimension: 64,
        ..Default::default()
    };
    EmbeddingService::new(Arc::new(HashingEmbeddingProvider::new(64)), &config)
}

async fn node_named(store: &dyn GraphStore, file: &str, name: &str) -> CodeElement {
    store
        .load_nodes()
        .await
        .unwrap()
        .into_iter()
        .find(|e| e.file_path == file && e.name == name)
        .unwrap()
}

#[tokio::test]
async fn test_syntax_error_among_valid_files() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..9 {
        write(
            dir.path(),
            &format!("pkg/mod_{i}.py"),
            &format!("def f{i}(x):\n    return x + {i}\n"),
        );
    }
    write(dir.path(), "pkg/broken.py", "def broken(:\n    pass\n");

    let store = Arc::new(InMemoryGraphStore::new());
    let summary = Indexer::new(store.clone(), RepographConfig::default())
        .index_directory(dir.path())
        .await
        .unwrap();

    assert_eq!(summary.files_seen, 10);
    assert_eq!(summary.files_extracted, 9);
    assert_eq!(summary.extraction_errors.len(), 1);
    assert_eq!(summary.extraction_errors[0].path, "pkg/broken.py");
    // one module and one function per valid file
    assert_eq!(summary.elements_indexed, 18);
    assert_eq!(store.node_count(), 18);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a.py", TOTAL_A);
    write(dir.path(), "b.py", TOTAL_B);
    write(
        dir.path(),
        "app/service.py",
        "from a import total\n\nclass Service:\n    def run(self, xs):\n        return total(xs)\n",
    );

    let store = Arc::new(InMemoryGraphStore::new());
    let indexer = Indexer::new(store.clone(), RepographConfig::default())
        .with_embeddings(hashing_service());

    indexer.index_directory(dir.path()).await.unwrap();
    let first_ids: BTreeSet<ElementId> =
        store.load_nodes().await.unwrap().into_iter().map(|e| e.id).collect();
    let counts = (store.node_count(), store.edge_count(), store.relation_count());

    let summary = indexer.index_directory(dir.path()).await.unwrap();
    let second_ids: BTreeSet<ElementId> =
        store.load_nodes().await.unwrap().into_iter().map(|e| e.id).collect();

    assert_eq!(first_ids, second_ids);
    assert_eq!(
        counts,
        (store.node_count(), store.edge_count(), store.relation_count())
    );
    assert!(summary.elements_not_indexed.is_empty());
    assert!(summary.edges_written >= 1);
}

#[tokio::test]
async fn test_sqlite_rerun_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "src/a.py", TOTAL_A);
    write(dir.path(), "src/b.py", TOTAL_B);

    let db = dir.path().join("state/graph.db");
    let store = Arc::new(SqliteGraphStore::open(&db).unwrap());
    let indexer = Indexer::new(store.clone(), RepographConfig::default());

    indexer.index_directory(&dir.path().join("src")).await.unwrap();
    let first = store.counts().await.unwrap();
    indexer.index_directory(&dir.path().join("src")).await.unwrap();
    assert_eq!(first, store.counts().await.unwrap());
    assert_eq!(first.0, 4);
}

#[tokio::test]
async fn test_formatting_only_differences_share_embedding() {
    let store = Arc::new(InMemoryGraphStore::new());
    let summary = Indexer::new(store.clone(), RepographConfig::default())
        .with_embeddings(hashing_service())
        .index_sources(vec![
            SourceFile::new("a.py", TOTAL_A),
            SourceFile::new("b.py", TOTAL_B),
        ])
        .await
        .unwrap();

    let a = node_named(store.as_ref(), "a.py", "total").await;
    let b = node_named(store.as_ref(), "b.py", "total").await;
    assert_eq!(a.content_hash, b.content_hash);
    assert_eq!(a.fingerprint, b.fingerprint);
    assert!(a.embedding.is_some());
    assert_eq!(a.embedding, b.embedding);

    assert_eq!(summary.cache.entries, 1);
    assert_eq!(summary.cache.hits + summary.cache.duplicates, 1);

    let edges = store.edges();
    assert_eq!(edges.len(), 1);
    assert!((edges[0].combined_score - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_add_and_sum2_share_fingerprint() {
    let store = Arc::new(InMemoryGraphStore::new());
    Indexer::new(store.clone(), RepographConfig::default())
        .index_sources(vec![SourceFile::new(
            "ops.py",
            "def add(a, b): return a + b\n\ndef sum2(x, y): return x + y\n",
        )])
        .await
        .unwrap();

    let add = node_named(store.as_ref(), "ops.py", "add").await;
    let sum2 = node_named(store.as_ref(), "ops.py", "sum2").await;
    assert_eq!(add.fingerprint, sum2.fingerprint);
    assert_eq!(structural_distance(&add.fingerprint, &sum2.fingerprint), 0.0);
    assert_ne!(add.content_hash, sum2.content_hash);
}

struct Offline;

#[async_trait]
impl EmbeddingProvider for Offline {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        Err(EmbeddingUnavailable::Service {
            message: "connection refused".to_string(),
            retryable: false,
        })
    }

    fn dimension(&self) -> usize {
        64
    }

    fn name(&self) -> &str {
        "offline"
    }
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_structure() {
    let store = Arc::new(InMemoryGraphStore::new());
    let service = EmbeddingService::new(Arc::new(Offline), &EmbeddingConfig::default());
    let summary = Indexer::new(store.clone(), RepographConfig::default())
        .with_embeddings(service)
        .index_sources(vec![
            SourceFile::new("a.py", TOTAL_A),
            SourceFile::new("b.py", TOTAL_B),
        ])
        .await
        .unwrap();

    assert_eq!(summary.degraded.len(), 2);
    assert_eq!(summary.elements_indexed, 4);
    let edges = store.edges();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].embedding_score, None);
    assert!((edges[0].structural_score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_cancelled_run_still_writes_nodes() {
    let store = Arc::new(InMemoryGraphStore::new());
    let indexer = Indexer::new(store.clone(), RepographConfig::default())
        .with_embeddings(hashing_service());
    indexer.cancellation().cancel();

    let summary = indexer
        .index_sources(vec![
            SourceFile::new("a.py", TOTAL_A),
            SourceFile::new("b.py", TOTAL_B),
        ])
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.degraded.len(), 2);
    assert_eq!(store.node_count(), 4);
}

/// Wraps the in-memory store with scripted failures
struct Scripted {
    inner: InMemoryGraphStore,
    reachable: bool,
    reject_name: &'static str,
    reject_relations_from: &'static str,
}

impl Scripted {
    fn new(reachable: bool, reject_name: &'static str) -> Self {
        Self {
            inner: InMemoryGraphStore::new(),
            reachable,
            reject_name,
            reject_relations_from: "",
        }
    }

    fn rejecting_relations_from(mut self, name: &'static str) -> Self {
        self.reject_relations_from = name;
        self
    }
}

#[async_trait]
impl GraphStore for Scripted {
    async fn ping(&self) -> Result<(), StoreError> {
        if self.reachable {
            Ok(())
        } else {
            Err(StoreError::Unreachable("connection refused".to_string()))
        }
    }

    async fn upsert_node(&self, element: &CodeElement) -> Result<(), StoreError> {
        if element.name == self.reject_name {
            return Err(StoreError::Write(StoreWriteError {
                target: element.id.to_string(),
                reason: "constraint violated".to_string(),
                transient: false,
            }));
        }
        self.inner.upsert_node(element).await
    }

    async fn upsert_edge(&self, edge: &SimilarityEdge) -> Result<(), StoreError> {
        self.inner.upsert_edge(edge).await
    }

    async fn upsert_relation(&self, relation: &Relation) -> Result<(), StoreError> {
        let marker = format!(".{}@", self.reject_relations_from);
        if !self.reject_relations_from.is_empty() && relation.source.as_str().contains(&marker) {
            return Err(StoreError::Write(StoreWriteError {
                target: relation.source.to_string(),
                reason: "constraint violated".to_string(),
                transient: false,
            }));
        }
        self.inner.upsert_relation(relation).await
    }

    async fn query_by_traversal(
        &self,
        pattern: &TraversalPattern,
        terms: &[WeightedTerm],
        limit: usize,
    ) -> Result<Vec<RankedId>, StoreError> {
        self.inner.query_by_traversal(pattern, terms, limit).await
    }

    async fn get_node(&self, id: &ElementId) -> Result<Option<CodeElement>, StoreError> {
        self.inner.get_node(id).await
    }

    async fn load_nodes(&self) -> Result<Vec<CodeElement>, StoreError> {
        self.inner.load_nodes().await
    }

    async fn similar_edges(
        &self,
        id: &ElementId,
        limit: usize,
    ) -> Result<Vec<SimilarityEdge>, StoreError> {
        self.inner.similar_edges(id, limit).await
    }

    async fn relations_from(&self, id: &ElementId) -> Result<Vec<Relation>, StoreError> {
        self.inner.relations_from(id).await
    }
}

#[tokio::test]
async fn test_unreachable_store_aborts() {
    let store = Arc::new(Scripted::new(false, ""));
    let err = Indexer::new(store, RepographConfig::default())
        .index_sources(vec![SourceFile::new("a.py", TOTAL_A)])
        .await
        .unwrap_err();
    assert!(matches!(err, IndexError::StoreUnreachable(_)));
}

#[tokio::test]
async fn test_rejected_write_reported_not_indexed() {
    let store = Arc::new(Scripted::new(true, "total"));
    let summary = Indexer::new(store.clone(), RepographConfig::default())
        .with_write_retry(RetryConfig::immediate(2))
        .index_sources(vec![
            SourceFile::new("a.py", TOTAL_A),
            SourceFile::new("b.py", TOTAL_B),
        ])
        .await
        .unwrap();

    assert_eq!(summary.elements_not_indexed.len(), 2);
    assert_eq!(summary.elements_indexed, 2);
    assert_eq!(summary.edges_written, 0);
    let kinds: Vec<ElementKind> = store
        .load_nodes()
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![ElementKind::Module, ElementKind::Module]);
}

#[tokio::test]
async fn test_rejected_relation_keeps_node_indexed() {
    let store = Arc::new(Scripted::new(true, "").rejecting_relations_from("total"));
    let summary = Indexer::new(store.clone(), RepographConfig::default())
        .with_write_retry(RetryConfig::immediate(2))
        .index_sources(vec![
            SourceFile::new("a.py", TOTAL_A),
            SourceFile::new("b.py", TOTAL_B),
        ])
        .await
        .unwrap();

    // each `total` has one defined-in relation
    assert_eq!(summary.relations_failed, 2);
    assert!(summary.elements_not_indexed.is_empty());
    assert_eq!(summary.elements_indexed, 4);
    assert_eq!(store.load_nodes().await.unwrap().len(), 4);

    // the stored pair is still linked
    assert_eq!(summary.edges_written, 1);
    let a = node_named(&store.inner, "a.py", "total").await;
    let edges = store.similar_edges(&a.id, 5).await.unwrap();
    assert_eq!(edges.len(), 1);
}
