//! Indexing run orchestration
//!
//! discover -> extract (parallel) -> resolve -> embed -> write -> link
//!
//! Per-file and per-element failures land in the [`RunSummary`]. Only an
//! unreachable store aborts the run.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::element::{CodeElement, ElementId, FileExtraction};
use super::fingerprint::FingerprintBuilder;
use super::normalize::normalize_source;
use super::parser::PythonParser;
use super::resolve::resolve_calls;
use crate::cancellation::RunCancellation;
use crate::config::{ExtractionConfig, RepographConfig};
use crate::embeddings::{CacheStats, EmbedRequest, EmbeddingService};
use crate::error::{ExtractionError, IndexError, StoreError};
use crate::graph::{GraphStore, Relation};
use crate::retry::{with_retry, RetryConfig};
use crate::similarity::{ElementProfile, SimilarityEngine, SweepStrategy};

/// Indexing phase for progress reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Discovering,
    Extracting,
    Resolving,
    Embedding,
    Writing,
    Linking,
    Complete,
}

/// Progress update sent during indexing
#[derive(Debug, Clone, Serialize)]
pub struct IndexProgress {
    pub phase: IndexPhase,
    pub current: usize,
    pub total: usize,
}

/// An in-memory source file. `path` is recorded in element ids.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

enum Input {
    Disk { absolute: PathBuf, relative: String },
    Memory(SourceFile),
}

impl Input {
    fn path(&self) -> &str {
        match self {
            Self::Disk { relative, .. } => relative,
            Self::Memory(file) => &file.path,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElementFailure {
    pub id: ElementId,
    pub error: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PhaseTimings {
    pub extract_ms: u64,
    pub embed_ms: u64,
    pub write_ms: u64,
    pub link_ms: u64,
    pub total_ms: u64,
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub timings: PhaseTimings,
    pub files_seen: usize,
    pub files_extracted: usize,
    pub extraction_errors: Vec<FileFailure>,
    pub elements_indexed: usize,
    pub elements_not_indexed: Vec<ElementFailure>,
    /// Elements scored on structure alone
    pub degraded: Vec<ElementFailure>,
    pub resolved_calls: usize,
    pub dangling_calls: usize,
    pub relations_written: usize,
    pub relations_failed: usize,
    pub edges_written: usize,
    pub edges_failed: usize,
    pub candidates_considered: usize,
    pub strategy: SweepStrategy,
    /// Upper bound on the chance a qualifying pair was skipped
    pub miss_bound: f64,
    pub cache: CacheStats,
    pub cancelled: bool,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            timings: PhaseTimings::default(),
            files_seen: 0,
            files_extracted: 0,
            extraction_errors: Vec::new(),
            elements_indexed: 0,
            elements_not_indexed: Vec::new(),
            degraded: Vec::new(),
            resolved_calls: 0,
            dangling_calls: 0,
            relations_written: 0,
            relations_failed: 0,
            edges_written: 0,
            edges_failed: 0,
            candidates_considered: 0,
            strategy: SweepStrategy::Auto,
            miss_bound: 0.0,
            cache: CacheStats::default(),
            cancelled: false,
        }
    }
}

pub struct Indexer {
    store: Arc<dyn GraphStore>,
    embeddings: Option<EmbeddingService>,
    config: RepographConfig,
    write_retry: RetryConfig,
    progress: Option<mpsc::UnboundedSender<IndexProgress>>,
    cancellation: RunCancellation,
}

impl Indexer {
    pub fn new(store: Arc<dyn GraphStore>, config: RepographConfig) -> Self {
        Self {
            store,
            embeddings: None,
            config,
            write_retry: RetryConfig::default(),
            progress: None,
            cancellation: RunCancellation::new(),
        }
    }

    pub fn with_embeddings(mut self, service: EmbeddingService) -> Self {
        self.embeddings = Some(service);
        self
    }

    pub fn with_progress(mut self, tx: mpsc::UnboundedSender<IndexProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_write_retry(mut self, retry: RetryConfig) -> Self {
        self.write_retry = retry;
        self
    }

    /// Handle for cancelling the run from another task
    pub fn cancellation(&self) -> RunCancellation {
        self.cancellation.clone()
    }

    /// Index every matching file under `root`
    pub async fn index_directory(&self, root: &Path) -> Result<RunSummary, IndexError> {
        if !root.is_dir() {
            return Err(IndexError::Root {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        self.ping().await?;

        self.report(IndexPhase::Discovering, 0, 0);
        let root = root.to_path_buf();
        let extraction = self.config.extraction.clone();
        let inputs = tokio::task::spawn_blocking(move || discover(&root, &extraction))
            .await
            .map_err(|e| IndexError::Task(e.to_string()))?;
        info!(files = inputs.len(), "Discovered source files");

        self.run(inputs).await
    }

    /// Index files that are already in memory
    pub async fn index_sources(&self, files: Vec<SourceFile>) -> Result<RunSummary, IndexError> {
        self.ping().await?;
        self.run(files.into_iter().map(Input::Memory).collect()).await
    }

    async fn ping(&self) -> Result<(), IndexError> {
        self.store
            .ping()
            .await
            .map_err(|e| IndexError::StoreUnreachable(e.to_string()))
    }

    async fn run(&self, inputs: Vec<Input>) -> Result<RunSummary, IndexError> {
        let started = Instant::now();
        let mut summary = RunSummary::new();
        summary.files_seen = inputs.len();

        // Extract
        let phase = Instant::now();
        let mut files = self.extract_all(inputs, &mut summary).await?;
        summary.files_extracted = files.len();
        summary.timings.extract_ms = phase.elapsed().as_millis() as u64;

        // Sync point: every file is in before calls are resolved
        self.report(IndexPhase::Resolving, 0, files.len());
        files.sort_by(|a, b| a.path.cmp(&b.path));
        let stats = resolve_calls(&mut files);
        summary.resolved_calls = stats.resolved;
        summary.dangling_calls = stats.dangling;
        let mut elements: Vec<CodeElement> = files.into_iter().flat_map(|f| f.elements).collect();

        let phase = Instant::now();
        self.embed_all(&mut elements, &mut summary).await;
        summary.timings.embed_ms = phase.elapsed().as_millis() as u64;

        let phase = Instant::now();
        let written = self.write_all(&elements, &mut summary).await?;
        summary.timings.write_ms = phase.elapsed().as_millis() as u64;

        let phase = Instant::now();
        self.link_all(&elements, &written, &mut summary).await?;
        summary.timings.link_ms = phase.elapsed().as_millis() as u64;

        if let Some(service) = &self.embeddings {
            summary.cache = service.cache().stats();
        }
        summary.cancelled = self.cancellation.is_cancelled();
        summary.timings.total_ms = started.elapsed().as_millis() as u64;
        self.report(IndexPhase::Complete, summary.elements_indexed, elements.len());

        info!(
            run_id = %summary.run_id,
            files = summary.files_extracted,
            errors = summary.extraction_errors.len(),
            elements = summary.elements_indexed,
            not_indexed = summary.elements_not_indexed.len(),
            relations_failed = summary.relations_failed,
            degraded = summary.degraded.len(),
            edges = summary.edges_written,
            cancelled = summary.cancelled,
            total_ms = summary.timings.total_ms,
            "Indexing run complete"
        );
        Ok(summary)
    }

    async fn extract_all(
        &self,
        inputs: Vec<Input>,
        summary: &mut RunSummary,
    ) -> Result<Vec<FileExtraction>, IndexError> {
        let total = inputs.len();
        self.report(IndexPhase::Extracting, 0, total);

        let semaphore = Arc::new(Semaphore::new(self.config.extraction.concurrency.max(1)));
        let min_nodes = self.config.similarity.min_structural_nodes;
        let mut handles = Vec::with_capacity(total);
        for input in inputs {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| IndexError::Task(e.to_string()))?;
            let path = input.path().to_string();
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                extract_one(input, min_nodes)
            });
            handles.push((path, handle));
        }

        let mut files = Vec::with_capacity(total);
        for (done, (path, handle)) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap_or_else(|e| {
                Err(ExtractionError::Parser {
                    path: PathBuf::from(&path),
                    reason: format!("extraction task failed: {e}"),
                })
            });
            match result {
                Ok(file) => {
                    debug!(
                        path = %file.path,
                        elements = file.elements.len(),
                        calls = file.call_count(),
                        "Extracted"
                    );
                    files.push(file);
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping file");
                    summary.extraction_errors.push(FileFailure {
                        path,
                        error: e.to_string(),
                    });
                }
            }
            self.report(IndexPhase::Extracting, done + 1, total);
        }
        Ok(files)
    }

    async fn embed_all(&self, elements: &mut [CodeElement], summary: &mut RunSummary) {
        let Some(service) = &self.embeddings else {
            return;
        };

        let requests: Vec<EmbedRequest> = elements
            .iter()
            .filter(|e| e.kind.is_comparable())
            .map(|e| EmbedRequest {
                id: e.id.clone(),
                key: e.content_hash.clone(),
                text: normalize_source(&e.source_text),
            })
            .collect();
        let total = requests.len();
        info!(provider = service.provider_name(), elements = total, "Embedding elements");
        self.report(IndexPhase::Embedding, 0, total);

        let results: HashMap<ElementId, _> = service
            .embed_many(requests, self.cancellation.child_token())
            .await
            .into_iter()
            .collect();

        for element in elements.iter_mut() {
            match results.get(&element.id) {
                Some(Ok(embedding)) => element.embedding = Some(embedding.clone()),
                Some(Err(e)) => summary.degraded.push(ElementFailure {
                    id: element.id.clone(),
                    error: e.to_string(),
                }),
                None if element.kind.is_comparable() => summary.degraded.push(ElementFailure {
                    id: element.id.clone(),
                    error: "embedding task lost".to_string(),
                }),
                None => {}
            }
        }
        self.report(IndexPhase::Embedding, total, total);
    }

    /// Upsert nodes, then their relations. Returns the ids that landed.
    async fn write_all(
        &self,
        elements: &[CodeElement],
        summary: &mut RunSummary,
    ) -> Result<HashSet<ElementId>, IndexError> {
        let total = elements.len();
        let store = &self.store;
        let mut written = HashSet::with_capacity(total);

        for (done, element) in elements.iter().enumerate() {
            let result = with_retry(&self.write_retry, "upsert_node", || {
                store.upsert_node(element)
            })
            .await;
            match result {
                Ok(()) => {
                    written.insert(element.id.clone());
                }
                Err(e) => self.not_indexed(element, e, summary)?,
            }
            self.report(IndexPhase::Writing, done + 1, total);
        }

        // A node that landed stays indexed even if some of its relations fail
        for element in elements.iter().filter(|e| written.contains(&e.id)) {
            for relation in Relation::for_element(element) {
                let result = with_retry(&self.write_retry, "upsert_relation", || {
                    store.upsert_relation(&relation)
                })
                .await;
                match result {
                    Ok(()) => summary.relations_written += 1,
                    Err(StoreError::Unreachable(reason)) => {
                        return Err(IndexError::StoreUnreachable(reason))
                    }
                    Err(e) => {
                        warn!(id = %element.id, error = %e, "Relation not written");
                        summary.relations_failed += 1;
                    }
                }
            }
        }

        summary.elements_indexed = written.len();
        Ok(written)
    }

    fn not_indexed(
        &self,
        element: &CodeElement,
        error: StoreError,
        summary: &mut RunSummary,
    ) -> Result<(), IndexError> {
        if let StoreError::Unreachable(reason) = error {
            return Err(IndexError::StoreUnreachable(reason));
        }
        warn!(id = %element.id, error = %error, "Element not indexed");
        summary.elements_not_indexed.push(ElementFailure {
            id: element.id.clone(),
            error: error.to_string(),
        });
        Ok(())
    }

    /// Similarity sweep over indexed elements, then edge upserts
    async fn link_all(
        &self,
        elements: &[CodeElement],
        written: &HashSet<ElementId>,
        summary: &mut RunSummary,
    ) -> Result<(), IndexError> {
        let profiles: Vec<ElementProfile> = elements
            .iter()
            .filter(|e| e.kind.is_comparable() && written.contains(&e.id))
            .map(ElementProfile::from_element)
            .collect();
        self.report(IndexPhase::Linking, 0, profiles.len());

        let engine = SimilarityEngine::new(&self.config.similarity);
        let threshold = self.config.similarity.edge_threshold;
        let cancel = self.cancellation.child_token();
        let sweep = tokio::task::spawn_blocking(move || {
            engine.all_pairs_above_threshold(&profiles, threshold, &cancel)
        })
        .await
        .map_err(|e| IndexError::Task(e.to_string()))?;

        summary.candidates_considered = sweep.candidates_considered;
        summary.strategy = sweep.strategy;
        summary.miss_bound = sweep.miss_bound;

        // Edges found before a cancellation are still written
        let store = &self.store;
        let total = sweep.edges.len();
        for (done, edge) in sweep.edges.iter().enumerate() {
            let result = with_retry(&self.write_retry, "upsert_edge", || {
                store.upsert_edge(edge)
            })
            .await;
            match result {
                Ok(()) => summary.edges_written += 1,
                Err(StoreError::Unreachable(reason)) => {
                    return Err(IndexError::StoreUnreachable(reason))
                }
                Err(e) => {
                    warn!(a = %edge.a, b = %edge.b, error = %e, "Similarity edge not written");
                    summary.edges_failed += 1;
                }
            }
            self.report(IndexPhase::Linking, done + 1, total);
        }
        Ok(())
    }

    fn report(&self, phase: IndexPhase, current: usize, total: usize) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(IndexProgress {
                phase,
                current,
                total,
            });
        }
    }
}

std::thread_local! {
    /// Parser reused across files on one blocking thread, keyed by the
    /// fingerprint node floor it was built with
    static PARSER: RefCell<Option<(usize, PythonParser)>> = const { RefCell::new(None) };
}

fn extract_one(input: Input, min_structural_nodes: usize) -> Result<FileExtraction, ExtractionError> {
    PARSER.with(|cell| {
        let mut slot = cell.borrow_mut();
        let mut parser = match slot.take() {
            Some((floor, parser)) if floor == min_structural_nodes => parser,
            _ => PythonParser::new()
                .map_err(|e| ExtractionError::Parser {
                    path: PathBuf::from(input.path()),
                    reason: e.to_string(),
                })?
                .with_fingerprints(FingerprintBuilder::new(min_structural_nodes)),
        };
        let result = match input {
            Input::Disk { absolute, relative } => parser.extract_file(&absolute, &relative),
            Input::Memory(file) => parser.extract(&file.path, &file.text),
        };
        *slot = Some((min_structural_nodes, parser));
        result
    })
}

/// Walk `root` honouring .gitignore, skipped directories, extensions and
/// the size limit. Sorted by relative path.
fn discover(root: &Path, config: &ExtractionConfig) -> Vec<Input> {
    let ignore_dirs = config.ignore_dirs.clone();
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(config.respect_gitignore)
        .git_exclude(config.respect_gitignore)
        .git_global(false)
        .require_git(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.depth() > 0 && ignore_dirs.iter().any(|d| entry.file_name() == d.as_str()))
        });

    let mut inputs = Vec::new();
    for entry in builder.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| config.extensions.iter().any(|x| x == e));
        if !matches_ext {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > config.max_file_bytes {
            debug!(path = %path.display(), size, "Skipping large file");
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        inputs.push(Input::Disk {
            absolute: path.to_path_buf(),
            relative,
        });
    }
    inputs.sort_by(|a, b| a.path().cmp(b.path()));
    inputs
}
