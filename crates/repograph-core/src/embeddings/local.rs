//! Local embeddings via fastembed

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::info;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbeddingUnavailable};

pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl FastEmbedProvider {
    /// Loads (and on first use downloads) the model named in config
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let (model, dimension) = match config.model.to_ascii_lowercase().as_str() {
            "bge-small-en-v1.5" | "bge-small" => (EmbeddingModel::BGESmallENV15, 384),
            "bge-base-en-v1.5" | "bge-base" => (EmbeddingModel::BGEBaseENV15, 768),
            "all-minilm-l6-v2" => (EmbeddingModel::AllMiniLML6V2, 384),
            "nomic-embed-text" | "nomic-embed-text-v1.5" => {
                (EmbeddingModel::NomicEmbedTextV15, 768)
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported fastembed model '{other}'"
                )))
            }
        };

        let options = InitOptions::new(model).with_show_download_progress(false);
        let embedding = TextEmbedding::try_new(options)
            .map_err(|e| ConfigError::Invalid(format!("failed to load embedding model: {e}")))?;
        info!(model = %config.model, dimension, "Loaded local embedding model");

        Ok(Self {
            model: Arc::new(Mutex::new(embedding)),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        let model = Arc::clone(&self.model);
        let text = text.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let model = model.lock();
            model.embed(vec![text], None)
        })
        .await
        .map_err(|e| EmbeddingUnavailable::Service {
            message: format!("embedding task failed: {e}"),
            retryable: false,
        })?;

        result
            .map_err(|e| EmbeddingUnavailable::Service {
                message: e.to_string(),
                retryable: false,
            })?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingUnavailable::Service {
                message: "no embedding returned".to_string(),
                retryable: false,
            })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}
