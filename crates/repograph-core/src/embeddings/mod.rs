//! Embeddings
//!
//! - `hashing` - Offline feature-hashing provider
//! - `http` - Ollama / OpenAI-compatible embedding endpoints
//! - `local` - fastembed ONNX models (`local-embeddings` feature)
//! - `cache` - Content-hash keyed cache, first writer wins
//! - `service` - Bounded, retrying, cancellable front for a provider

pub mod cache;
pub mod hashing;
pub mod http;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod service;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use crate::error::{ConfigError, EmbeddingUnavailable};

pub use cache::{CacheStats, EmbeddingCache};
pub use hashing::HashingEmbeddingProvider;
pub use http::{HttpEmbeddingProvider, HttpFlavor};
#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedProvider;
pub use service::{EmbedRequest, EmbeddingService};

/// Source of raw embedding vectors
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// L2-normalized embedding vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Embedding(Arc<[f32]>);

impl Embedding {
    /// Validate and normalize a raw vector.
    ///
    /// Zero, non-finite and wrong-dimension vectors are rejected.
    pub fn new(raw: Vec<f32>, expected_dimension: usize) -> Result<Self, EmbeddingUnavailable> {
        if raw.len() != expected_dimension {
            return Err(EmbeddingUnavailable::DimensionMismatch {
                expected: expected_dimension,
                actual: raw.len(),
            });
        }
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(EmbeddingUnavailable::NonFinite);
        }
        let norm = raw.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 || !norm.is_finite() {
            return Err(EmbeddingUnavailable::ZeroVector);
        }
        Ok(Self(raw.into_iter().map(|v| v / norm).collect()))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    /// Cosine similarity. `None` when dimensions differ.
    pub fn cosine(&self, other: &Embedding) -> Option<f32> {
        if self.dimension() != other.dimension() {
            return None;
        }
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        Some(dot.clamp(-1.0, 1.0))
    }

    /// Little-endian f32 bytes for BLOB storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EmbeddingUnavailable> {
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        let dimension = values.len();
        Self::new(values, dimension)
    }
}

impl TryFrom<Vec<f32>> for Embedding {
    type Error = EmbeddingUnavailable;

    fn try_from(raw: Vec<f32>) -> Result<Self, Self::Error> {
        let dimension = raw.len();
        Self::new(raw, dimension)
    }
}

impl From<Embedding> for Vec<f32> {
    fn from(embedding: Embedding) -> Self {
        embedding.0.to_vec()
    }
}

/// Build the provider named in config. `None` disables embeddings.
pub fn build_provider(
    config: &EmbeddingConfig,
) -> Result<Option<Arc<dyn EmbeddingProvider>>, ConfigError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider {
        EmbeddingProviderKind::Disabled => return Ok(None),
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbeddingProvider::new(config.dimension)),
        EmbeddingProviderKind::Ollama => Arc::new(HttpEmbeddingProvider::new(
            HttpFlavor::Ollama,
            config,
        )?),
        EmbeddingProviderKind::OpenAi => Arc::new(HttpEmbeddingProvider::new(
            HttpFlavor::OpenAi,
            config,
        )?),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProviderKind::FastEmbed => Arc::new(FastEmbedProvider::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProviderKind::FastEmbed => {
            return Err(ConfigError::Invalid(
                "fastembed provider requires the local-embeddings feature".to_string(),
            ))
        }
    };
    Ok(Some(provider))
}
