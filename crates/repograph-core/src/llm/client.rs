//! Completion clients

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::LlmConfig;

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    fn model(&self) -> &str;
}

/// Ollama `/api/generate`, streamed as NDJSON
pub struct OllamaCompletion {
    client: reqwest::Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaCompletion {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build LLM HTTP client")?;
        Ok(Self {
            client,
            url: format!("{}/api/generate", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl CompletionService for OllamaCompletion {
    async fn complete(&self, prompt: &str) -> Result<String> {
        info!(model = %self.model, prompt_chars = prompt.len(), "Requesting completion");

        let resp = self
            .client
            .post(&self.url)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                stream: true,
            })
            .send()
            .await
            .context("Failed to connect to Ollama")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ollama generate API returned {status}: {body}");
        }

        let mut stream = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut answer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read completion stream")?;
            buffer.extend_from_slice(&chunk);
            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                if append_line(&mut answer, &String::from_utf8_lossy(&line))? {
                    debug!(chars = answer.len(), "Completion finished");
                    return Ok(answer);
                }
            }
        }
        append_line(&mut answer, &String::from_utf8_lossy(&buffer))?;
        Ok(answer)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Append one NDJSON line's `response`. Returns true once `done` is seen.
fn append_line(answer: &mut String, line: &str) -> Result<bool> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(false);
    }
    let chunk: GenerateChunk =
        serde_json::from_str(line).with_context(|| format!("Malformed completion chunk: {line}"))?;
    if let Some(error) = chunk.error {
        anyhow::bail!("Ollama returned an error: {error}");
    }
    answer.push_str(&chunk.response);
    Ok(chunk.done)
}

/// Concatenate the `response` fields of a complete NDJSON body
pub fn parse_generate_body(body: &str) -> Result<String> {
    let mut answer = String::new();
    for line in body.lines() {
        if append_line(&mut answer, line)? {
            break;
        }
    }
    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenates_ndjson() {
        let body = "{\"response\":\"Hel\",\"done\":false}\n\n{\"response\":\"lo\",\"done\":false}\n{\"response\":\"\",\"done\":true}\n{\"response\":\"ignored\"}\n";
        assert_eq!(parse_generate_body(body).unwrap(), "Hello");
    }

    #[test]
    fn test_error_chunk_fails() {
        let body = "{\"error\":\"model not found\"}\n";
        let err = parse_generate_body(body).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn test_malformed_chunk_fails() {
        assert!(parse_generate_body("not json\n").is_err());
    }

    #[test]
    fn test_client_url() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:11434/".to_string(),
            ..Default::default()
        };
        let client = OllamaCompletion::new(&config).unwrap();
        assert_eq!(client.url, "http://127.0.0.1:11434/api/generate");
        assert_eq!(client.model(), "llama3");
    }
}
