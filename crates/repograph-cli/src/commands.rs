//! Command handlers

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use repograph_core::config::RepographConfig;
use repograph_core::embeddings::{build_provider, EmbeddingService};
use repograph_core::graph::{open_store, GraphStore};
use repograph_core::index::{CodeElement, ElementId, IndexProgress, Indexer, RunSummary};
use repograph_core::llm::{CompletionService, OllamaCompletion, PromptBuilder, ResponseFormatter};
use repograph_core::query::{QueryExpander, RetrievalOutcome, Retriever};
use repograph_core::similarity::{ElementProfile, PairScore, SimilarityEngine};

#[derive(Args)]
pub struct IndexArgs {
    /// Repository root
    pub path: PathBuf,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct QueryArgs {
    /// Natural-language question
    #[arg(required = true, trailing_var_arg = true)]
    pub text: Vec<String>,

    /// Maximum number of results
    #[arg(short, long)]
    pub limit: Option<usize>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct SimilarArgs {
    /// Element id, qualified name, or plain name
    pub element: String,

    #[arg(short, long)]
    pub limit: Option<usize>,
}

#[derive(Args)]
pub struct AskArgs {
    #[arg(required = true, trailing_var_arg = true)]
    pub question: Vec<String>,

    /// Print the prompt instead of calling the model
    #[arg(long)]
    pub show_prompt: bool,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn store(config: &RepographConfig) -> Result<Arc<dyn GraphStore>> {
    open_store(&config.store).context("Failed to open graph store")
}

fn embedding_service(config: &RepographConfig) -> Result<Option<EmbeddingService>> {
    let provider = build_provider(&config.embedding).context("Failed to set up embeddings")?;
    Ok(provider.map(|p| EmbeddingService::new(p, &config.embedding)))
}

fn retriever(config: &RepographConfig) -> Result<Retriever> {
    let mut retriever = Retriever::new(
        store(config)?,
        QueryExpander::new(&config.expansion),
        config.retrieval.clone(),
    );
    if let Some(service) = embedding_service(config)? {
        retriever = retriever.with_embeddings(service);
    }
    Ok(retriever)
}

pub async fn index(config: RepographConfig, args: IndexArgs) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut indexer = Indexer::new(store(&config)?, config.clone()).with_progress(tx);
    if let Some(service) = embedding_service(&config)? {
        indexer = indexer.with_embeddings(service);
    }

    let cancel = indexer.cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping new work");
            cancel.cancel();
        }
    });
    let reporter = tokio::spawn(log_progress(rx));

    let summary = indexer
        .index_directory(&args.path)
        .await
        .with_context(|| format!("Indexing {} failed", args.path.display()))?;
    drop(indexer);
    let _ = reporter.await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

async fn log_progress(mut rx: mpsc::UnboundedReceiver<IndexProgress>) {
    let mut last = None;
    while let Some(progress) = rx.recv().await {
        if last != Some(progress.phase) {
            info!(phase = ?progress.phase, total = progress.total, "Phase started");
            last = Some(progress.phase);
        }
    }
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Indexed {} elements from {}/{} files in {} ms",
        summary.elements_indexed,
        summary.files_extracted,
        summary.files_seen,
        summary.timings.total_ms
    );
    for failure in &summary.extraction_errors {
        println!("  skipped {}: {}", failure.path, failure.error);
    }
    for failure in &summary.elements_not_indexed {
        println!("  not indexed {}: {}", failure.id, failure.error);
    }
    if !summary.degraded.is_empty() {
        println!("  {} elements scored on structure only", summary.degraded.len());
    }
    println!(
        "  calls: {} resolved, {} dangling",
        summary.resolved_calls, summary.dangling_calls
    );
    if summary.relations_failed > 0 {
        println!("  {} relations not written", summary.relations_failed);
    }
    println!(
        "  similarity edges: {} ({} sweep, {} candidates, miss bound {:.2e})",
        summary.edges_written, summary.strategy, summary.candidates_considered, summary.miss_bound
    );
    println!(
        "  embedding cache: {} hits, {} misses, {} entries",
        summary.cache.hits, summary.cache.misses, summary.cache.entries
    );
    if summary.cancelled {
        println!("  run was cancelled; results are partial");
    }
}

pub async fn query(config: RepographConfig, args: QueryArgs) -> Result<()> {
    let text = args.text.join(" ");
    let limit = args.limit.unwrap_or(config.retrieval.limit);
    let outcome = retriever(&config)?
        .retrieve_limit(&text, limit)
        .await
        .context("Retrieval failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &RetrievalOutcome) {
    let terms: Vec<&str> = outcome.expansion.terms().collect();
    println!("pattern: {}  terms: {}", outcome.pattern, terms.join(", "));
    if outcome.hits.is_empty() {
        println!("no matches");
        return;
    }
    for (rank, hit) in outcome.hits.iter().enumerate() {
        println!(
            "{:>2}. {} ({}) {}:{}-{}  [{:.4}]",
            rank + 1,
            hit.element.qualified_name,
            hit.element.kind,
            hit.element.file_path,
            hit.element.line_start,
            hit.element.line_end,
            hit.score
        );
        for edge in &hit.similar {
            println!(
                "      ~ {} ({:.2})",
                edge.other(&hit.element.id),
                edge.combined_score
            );
        }
    }
}

pub async fn similar(config: RepographConfig, args: SimilarArgs) -> Result<()> {
    let store = store(&config)?;
    let element = find_element(store.as_ref(), &args.element).await?;
    let limit = args.limit.unwrap_or(config.similarity.top_k);
    let ranked = rank_similar(store.as_ref(), &config, &element, limit).await?;

    println!("{} ({})", element.qualified_name, element.id);
    if ranked.is_empty() {
        println!("no comparable elements in the store");
    }
    for (other, score) in ranked {
        let embedding = score
            .embedding
            .map(|s| format!("{s:.2}"))
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "  {:.3}  {}  (structural {:.2}, embedding {})",
            score.combined, other.qualified_name, score.structural, embedding
        );
    }
    Ok(())
}

/// Score `target` against every stored comparable element, best first
async fn rank_similar(
    store: &dyn GraphStore,
    config: &RepographConfig,
    target: &CodeElement,
    limit: usize,
) -> Result<Vec<(CodeElement, PairScore)>> {
    if !target.kind.is_comparable() {
        bail!("{} is a {}; only functions, methods and classes are compared", target.id, target.kind);
    }
    let nodes = store
        .load_nodes()
        .await
        .context("Failed to load elements")?;
    let pool: Vec<ElementProfile> = nodes
        .iter()
        .filter(|e| e.kind.is_comparable())
        .map(ElementProfile::from_element)
        .collect();

    let engine = SimilarityEngine::new(&config.similarity);
    let top = engine.top_k_similar_to(&ElementProfile::from_element(target), &pool, limit);

    let mut by_id: HashMap<ElementId, CodeElement> =
        nodes.into_iter().map(|e| (e.id.clone(), e)).collect();
    Ok(top
        .into_iter()
        .filter_map(|(id, score)| by_id.remove(&id).map(|e| (e, score)))
        .collect())
}

/// Look up by id, then qualified name, then plain name
async fn find_element(store: &dyn GraphStore, needle: &str) -> Result<CodeElement> {
    if let Some(element) = store.get_node(&ElementId::from(needle)).await? {
        return Ok(element);
    }
    let nodes = store.load_nodes().await?;
    let mut matches: Vec<&CodeElement> = nodes
        .iter()
        .filter(|e| e.qualified_name == needle)
        .collect();
    if matches.is_empty() {
        matches = nodes.iter().filter(|e| e.name == needle).collect();
    }
    match matches.as_slice() {
        [] => bail!("No element named {needle}"),
        [one] => Ok((*one).clone()),
        many => {
            for e in many {
                eprintln!("  {}", e.id);
            }
            bail!("{} elements match {needle}; pass a full id", many.len())
        }
    }
}

pub async fn ask(config: RepographConfig, args: AskArgs) -> Result<()> {
    let question = args.question.join(" ");
    let outcome = retriever(&config)?
        .retrieve(&question)
        .await
        .context("Retrieval failed")?;
    let prompt = PromptBuilder::new(config.llm.max_context_chars).build(&question, &outcome.hits);
    if args.show_prompt {
        println!("{prompt}");
        return Ok(());
    }

    let client = OllamaCompletion::new(&config.llm)?;
    let raw = client
        .complete(&prompt)
        .await
        .with_context(|| format!("Completion with {} failed", client.model()))?;
    println!("{}", ResponseFormatter::new().format(&raw));
    Ok(())
}

pub fn config(config: &RepographConfig, explicit: Option<&Path>, action: ConfigCommands) -> Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(RepographConfig::default_path);
    match action {
        ConfigCommands::Show => print!("{}", config.to_toml()?),
        ConfigCommands::Path => match path {
            Some(path) => println!("{}", path.display()),
            None => bail!("No config directory on this platform"),
        },
        ConfigCommands::Init { force } => {
            let Some(path) = path else {
                bail!("No config directory on this platform; pass --config");
            };
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, RepographConfig::default().to_toml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
