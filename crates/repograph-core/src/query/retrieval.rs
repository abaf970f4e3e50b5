//! Query-time retrieval over the graph store

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::expander::{QueryExpander, QueryExpansion, TermOrigin, WeightedTerm};
use crate::config::RetrievalConfig;
use crate::embeddings::EmbeddingService;
use crate::error::StoreError;
use crate::graph::{GraphStore, RankedId, TraversalPattern};
use crate::index::{CodeElement, ElementId, ElementKind};
use crate::similarity::SimilarityEdge;

/// One retrieved element
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    pub element: CodeElement,
    /// Fused reciprocal-rank score
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traversal_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_rank: Option<usize>,
    pub similar: Vec<SimilarityEdge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub expansion: QueryExpansion,
    pub pattern: &'static str,
    pub hits: Vec<RetrievalHit>,
    /// Matched on raw query text because expansion produced nothing
    pub used_fallback: bool,
    /// The embedding probe failed and ranking used traversal only
    pub embedding_degraded: bool,
}

pub struct Retriever {
    store: Arc<dyn GraphStore>,
    expander: QueryExpander,
    embeddings: Option<EmbeddingService>,
    config: RetrievalConfig,
}

impl Retriever {
    pub fn new(store: Arc<dyn GraphStore>, expander: QueryExpander, config: RetrievalConfig) -> Self {
        Self {
            store,
            expander,
            embeddings: None,
            config,
        }
    }

    pub fn with_embeddings(mut self, service: EmbeddingService) -> Self {
        self.embeddings = Some(service);
        self
    }

    pub async fn retrieve(&self, query: &str) -> Result<RetrievalOutcome, StoreError> {
        self.retrieve_limit(query, self.config.limit).await
    }

    pub async fn retrieve_limit(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<RetrievalOutcome, StoreError> {
        let expansion = self.expander.expand(query);
        let pattern = TraversalPattern::infer(&expansion);
        let candidates = limit.saturating_mul(2).max(limit);

        let used_fallback = expansion.is_empty();
        let terms = if used_fallback {
            raw_terms(query)
        } else {
            expansion.expanded_terms.clone()
        };

        let mut traversal = Vec::new();
        if !terms.is_empty() {
            traversal = self
                .store
                .query_by_traversal(&pattern, &terms, candidates)
                .await?;
            if traversal.is_empty() && pattern != TraversalPattern::all_elements() {
                debug!(pattern = pattern.name(), "No traversal results, widening to all elements");
                traversal = self
                    .store
                    .query_by_traversal(&TraversalPattern::all_elements(), &terms, candidates)
                    .await?;
            }
        }

        let (semantic, embedding_degraded) = self.semantic_ranking(&expansion, candidates).await?;

        let fused = fuse(
            &[
                (&traversal, self.config.traversal_weight),
                (&semantic, self.config.embedding_weight),
            ],
            self.config.rrf_k,
        );
        let traversal_ranks = positions(&traversal);
        let semantic_ranks = positions(&semantic);

        let mut hits = Vec::new();
        for (id, score) in fused.into_iter().take(limit) {
            let Some(element) = self.store.get_node(&id).await? else {
                continue;
            };
            let similar = if self.config.similar_per_hit > 0 {
                self.store
                    .similar_edges(&id, self.config.similar_per_hit)
                    .await?
            } else {
                Vec::new()
            };
            hits.push(RetrievalHit {
                traversal_rank: traversal_ranks.get(&id).copied(),
                embedding_rank: semantic_ranks.get(&id).copied(),
                element,
                score,
                similar,
            });
        }

        info!(
            pattern = pattern.name(),
            terms = terms.len(),
            traversal = traversal.len(),
            semantic = semantic.len(),
            hits = hits.len(),
            used_fallback,
            "Retrieval complete"
        );

        Ok(RetrievalOutcome {
            expansion,
            pattern: pattern.name(),
            hits,
            used_fallback,
            embedding_degraded,
        })
    }

    /// Cosine ranking of stored embeddings against the probe text.
    /// An embedding failure degrades to an empty ranking.
    async fn semantic_ranking(
        &self,
        expansion: &QueryExpansion,
        limit: usize,
    ) -> Result<(Vec<RankedId>, bool), StoreError> {
        let Some(service) = &self.embeddings else {
            return Ok((Vec::new(), false));
        };
        let probe_text = expansion.probe_text();
        if probe_text.is_empty() {
            return Ok((Vec::new(), false));
        }

        let probe = match service.embed_text(&probe_text).await {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "Query embedding unavailable, using traversal only");
                return Ok((Vec::new(), true));
            }
        };

        let hints = &expansion.inferred_kind_hints;
        let mut ranked: Vec<RankedId> = self
            .store
            .load_nodes()
            .await?
            .into_iter()
            .filter(|e| e.kind != ElementKind::Module)
            .filter(|e| hints.is_empty() || hints.contains(&e.kind))
            .filter_map(|e| {
                let score = e.embedding.as_ref()?.cosine(&probe)?;
                Some(RankedId { id: e.id, score })
            })
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        ranked.truncate(limit);
        Ok((ranked, false))
    }
}

/// Lowercased whitespace tokens, used when expansion yields nothing
fn raw_terms(query: &str) -> Vec<WeightedTerm> {
    query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|t| !t.is_empty())
        .map(|t| WeightedTerm {
            term: t.to_lowercase(),
            weight: 1.0,
            origin: TermOrigin::Word,
        })
        .collect()
}

fn positions(ranking: &[RankedId]) -> HashMap<ElementId, usize> {
    ranking
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.clone(), i + 1))
        .collect()
}

/// Weighted reciprocal-rank fusion: `sum(w / (k + rank))`, ranks from 1
fn fuse(rankings: &[(&Vec<RankedId>, f32)], k: f32) -> Vec<(ElementId, f32)> {
    let mut scores: HashMap<ElementId, f32> = HashMap::new();
    for (ranking, weight) in rankings {
        for (i, r) in ranking.iter().enumerate() {
            *scores.entry(r.id.clone()).or_default() += weight / (k + (i + 1) as f32);
        }
    }
    let mut fused: Vec<(ElementId, f32)> = scores.into_iter().collect();
    fused.sort_by(|(ia, a), (ib, b)| b.total_cmp(a).then_with(|| ia.cmp(ib)));
    fused
}
