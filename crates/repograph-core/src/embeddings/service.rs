//! Embedding service
//!
//! Fronts a provider with the content-hash cache, a concurrency limit,
//! retries with backoff, a per-call timeout, and cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Embedding, EmbeddingCache, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingUnavailable;
use crate::index::normalize::hash_normalized;
use crate::index::ElementId;
use crate::retry::{with_retry, RetryConfig};

/// One element to embed
#[derive(Debug, Clone)]
pub struct EmbedRequest {
    pub id: ElementId,
    /// Cache key, the element's content hash
    pub key: String,
    /// Normalized source text
    pub text: String,
}

#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    retry: RetryConfig,
    timeout: Duration,
    max_input_chars: usize,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self {
            provider,
            cache: Arc::new(EmbeddingCache::new(config.cache_capacity)),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            concurrency: config.concurrency.max(1),
            retry: config.retry(),
            timeout: config.timeout(),
            max_input_chars: config.max_input_chars,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Embed text keyed by its own hash
    pub async fn embed_text(&self, text: &str) -> Result<Embedding, EmbeddingUnavailable> {
        self.embed(&hash_normalized(text), text).await
    }

    /// Embed `text`, going through the cache under `key`
    pub async fn embed(&self, key: &str, text: &str) -> Result<Embedding, EmbeddingUnavailable> {
        if text.trim().is_empty() {
            return Err(EmbeddingUnavailable::EmptyInput);
        }
        self.cache
            .get_or_compute(key, || self.fetch(truncate(text, self.max_input_chars)))
            .await
    }

    async fn fetch(&self, text: &str) -> Result<Embedding, EmbeddingUnavailable> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EmbeddingUnavailable::Cancelled)?;

        let raw = with_retry(&self.retry, "embed", move || async move {
            match tokio::time::timeout(self.timeout, self.provider.embed(text)).await {
                Ok(result) => result,
                Err(_) => Err(EmbeddingUnavailable::Timeout(self.timeout)),
            }
        })
        .await?;

        Embedding::new(raw, self.provider.dimension())
    }

    /// Embed many requests concurrently.
    ///
    /// Each request fails on its own. Once `cancel` fires, requests that have
    /// not started are skipped and in-flight ones are abandoned; both report
    /// `Cancelled`.
    pub async fn embed_many(
        &self,
        requests: Vec<EmbedRequest>,
        cancel: CancellationToken,
    ) -> Vec<(ElementId, Result<Embedding, EmbeddingUnavailable>)> {
        let total = requests.len();
        info!(
            requests = total,
            concurrency = self.concurrency,
            provider = self.provider.name(),
            "Embedding elements"
        );

        let mut handles = Vec::with_capacity(total);
        for request in requests {
            let service = self.clone();
            let cancel = cancel.child_token();
            let handle = tokio::spawn(async move {
                if cancel.is_cancelled() {
                    return (request.id, Err(EmbeddingUnavailable::Cancelled));
                }
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(EmbeddingUnavailable::Cancelled),
                    result = service.embed(&request.key, &request.text) => result,
                };
                if let Err(e) = &result {
                    debug!(id = %request.id, error = %e, "Embedding unavailable");
                }
                (request.id, result)
            });
            handles.push(handle);
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => warn!(error = %e, "Embedding task panicked"),
            }
        }

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        info!(
            embedded = results.len() - failed,
            failed,
            "Embedding complete"
        );
        results
    }
}

/// Cut at a char boundary at or before `max_chars` bytes
fn truncate(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let mut end = max_chars;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
