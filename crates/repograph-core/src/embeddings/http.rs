//! HTTP embedding providers
//!
//! Ollama's `/api/embed` and OpenAI-compatible `/v1/embeddings`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{ConfigError, EmbeddingUnavailable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFlavor {
    Ollama,
    OpenAi,
}

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    flavor: HttpFlavor,
    url: String,
    model: String,
    api_key: Option<String>,
    dimension: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(flavor: HttpFlavor, config: &EmbeddingConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("embedding HTTP client: {e}")))?;
        let base = config.base_url.trim_end_matches('/');
        let url = match flavor {
            HttpFlavor::Ollama => format!("{base}/api/embed"),
            HttpFlavor::OpenAi => format!("{base}/v1/embeddings"),
        };
        Ok(Self {
            client,
            flavor,
            url,
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            dimension: config.dimension,
            timeout: config.timeout(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, e: reqwest::Error) -> EmbeddingUnavailable {
        if e.is_timeout() {
            EmbeddingUnavailable::Timeout(self.timeout)
        } else {
            EmbeddingUnavailable::Service {
                message: e.to_string(),
                retryable: e.is_connect() || e.is_request(),
            }
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        let request = match self.flavor {
            HttpFlavor::Ollama => self.client.post(&self.url).json(&OllamaEmbedRequest {
                model: &self.model,
                input: text,
                truncate: true,
            }),
            HttpFlavor::OpenAi => {
                let builder = self.client.post(&self.url).json(&OpenAiEmbedRequest {
                    model: &self.model,
                    input: text,
                });
                match &self.api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            }
        };

        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %body, "Embedding request rejected");
            return Err(status_error(status, retry_after, &body));
        }

        let vector = match self.flavor {
            HttpFlavor::Ollama => response
                .json::<OllamaEmbedResponse>()
                .await
                .map_err(|e| self.transport_error(e))?
                .embeddings
                .into_iter()
                .next(),
            HttpFlavor::OpenAi => response
                .json::<OpenAiEmbedResponse>()
                .await
                .map_err(|e| self.transport_error(e))?
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding),
        };

        vector.ok_or_else(|| EmbeddingUnavailable::Service {
            message: "no embedding returned".to_string(),
            retryable: false,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        match self.flavor {
            HttpFlavor::Ollama => "ollama",
            HttpFlavor::OpenAi => "openai",
        }
    }
}

/// `Retry-After` in delta-seconds form
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().filter(|s| *s >= 0.0).map(Duration::from_secs_f64)
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> EmbeddingUnavailable {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return EmbeddingUnavailable::RateLimited { retry_after };
    }
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
        return EmbeddingUnavailable::Service {
            message: format!("{status}"),
            retryable: true,
        };
    }
    let snippet: String = body.chars().take(200).collect();
    EmbeddingUnavailable::Service {
        message: format!("{status}: {snippet}"),
        retryable: status.is_server_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::IsRetryable;

    #[test]
    fn test_urls() {
        let config = EmbeddingConfig {
            base_url: "http://localhost:11434/".to_string(),
            ..Default::default()
        };
        let ollama = HttpEmbeddingProvider::new(HttpFlavor::Ollama, &config).unwrap();
        assert_eq!(ollama.url(), "http://localhost:11434/api/embed");
        let openai = HttpEmbeddingProvider::new(HttpFlavor::OpenAi, &config).unwrap();
        assert_eq!(openai.url(), "http://localhost:11434/v1/embeddings");
        assert_eq!(openai.name(), "openai");
    }

    #[test]
    fn test_rate_limit_mapping() {
        let err = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            parse_retry_after("2"),
            "",
        );
        assert_eq!(
            err,
            EmbeddingUnavailable::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_server_errors_retryable() {
        assert!(status_error(StatusCode::BAD_GATEWAY, None, "oops").is_retryable());
        assert!(!status_error(StatusCode::BAD_REQUEST, None, "too long").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, None, "").is_retryable());
    }

    #[test]
    fn test_retry_after_parsing() {
        assert_eq!(parse_retry_after(" 5 "), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
