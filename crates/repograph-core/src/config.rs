//! Configuration
//!
//! Defaults, then `config.toml`, then `REPOGRAPH_*` environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::similarity::SweepStrategy;

const CONFIG_DIR: &str = "repograph";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RepographConfig {
    pub extraction: ExtractionConfig,
    pub similarity: SimilarityConfig,
    pub embedding: EmbeddingConfig,
    pub expansion: ExpansionConfig,
    pub retrieval: RetrievalConfig,
    pub store: StoreConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// File extensions to index, without the dot
    pub extensions: Vec<String>,
    /// Directory names skipped during discovery
    pub ignore_dirs: Vec<String>,
    /// Honour .gitignore files
    pub respect_gitignore: bool,
    /// Files larger than this are skipped
    pub max_file_bytes: u64,
    /// Files parsed in parallel
    pub concurrency: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["py".to_string()],
            ignore_dirs: [
                ".git",
                "__pycache__",
                ".venv",
                "venv",
                ".tox",
                "node_modules",
                "build",
                "dist",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            respect_gitignore: true,
            max_file_bytes: 1_000_000,
            concurrency: default_concurrency(),
        }
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub structural_weight: f32,
    pub embedding_weight: f32,
    /// Minimum combined score for a materialized edge
    pub edge_threshold: f32,
    /// Fingerprints shorter than this are low confidence
    pub min_structural_nodes: usize,
    /// Share of the structural term kept for low-confidence pairs
    pub low_confidence_factor: f32,
    pub strategy: SweepStrategy,
    /// `auto` stays exhaustive up to this many profiles
    pub exhaustive_limit: usize,
    pub lsh_tables: usize,
    pub lsh_bits: usize,
    pub lsh_seed: u64,
    pub top_k: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            structural_weight: 0.4,
            embedding_weight: 0.6,
            edge_threshold: 0.7,
            min_structural_nodes: 8,
            low_confidence_factor: 0.5,
            strategy: SweepStrategy::Auto,
            exhaustive_limit: 2000,
            lsh_tables: 16,
            lsh_bits: 6,
            lsh_seed: 0x5eed_cafe,
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    Ollama,
    OpenAi,
    /// Offline feature hashing
    Hashing,
    /// Local ONNX model (`local-embeddings` feature)
    FastEmbed,
    /// Skip embeddings, structural scoring only
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub dimension: usize,
    /// Concurrent requests to the provider
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub cache_capacity: u64,
    /// Longer inputs are truncated before embedding
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Ollama,
            base_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            api_key: None,
            dimension: 768,
            concurrency: 4,
            timeout_secs: 30,
            max_retries: 3,
            cache_capacity: 100_000,
            max_input_chars: 3000,
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::default().with_max_retries(self.max_retries)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub identifier_weight: f32,
    pub word_weight: f32,
    pub subword_weight: f32,
    /// Multiplier applied to the weight of the term a synonym came from
    pub synonym_weight: f32,
    pub extra_stopwords: Vec<String>,
    /// Use only `synonyms`, dropping the built-in table
    pub replace_default_synonyms: bool,
    /// Merged over the built-in table
    pub synonyms: BTreeMap<String, Vec<String>>,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            identifier_weight: 2.0,
            word_weight: 1.0,
            subword_weight: 0.5,
            synonym_weight: 0.6,
            extra_stopwords: Vec::new(),
            replace_default_synonyms: false,
            synonyms: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub limit: usize,
    /// Reciprocal-rank fusion constant
    pub rrf_k: f32,
    pub traversal_weight: f32,
    pub embedding_weight: f32,
    /// Similar elements attached to each hit
    pub similar_per_hit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            rrf_k: 60.0,
            traversal_weight: 1.0,
            embedding_weight: 1.0,
            similar_per_hit: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Database path, falling back to the user data directory
    pub fn resolved_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|d| d.join(CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".repograph"))
            .join("graph.db")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Context budget for prompts, in characters
    pub max_context_chars: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3".to_string(),
            max_context_chars: 16_000,
            timeout_secs: 120,
        }
    }
}

impl RepographConfig {
    /// Load from an explicit file, or from the user config dir when present,
    /// then apply environment overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply `REPOGRAPH_*` overrides read through `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_PROVIDER") {
            self.embedding.provider = parse_provider(&v)?;
        }
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_URL") {
            self.embedding.base_url = v;
        }
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.embedding.api_key = Some(v);
        }
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_DIMENSION") {
            self.embedding.dimension = parse_number("REPOGRAPH_EMBEDDING_DIMENSION", &v)?;
        }
        if let Some(v) = lookup("REPOGRAPH_EMBEDDING_CONCURRENCY") {
            self.embedding.concurrency = parse_number("REPOGRAPH_EMBEDDING_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("REPOGRAPH_EDGE_THRESHOLD") {
            self.similarity.edge_threshold = parse_number("REPOGRAPH_EDGE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("REPOGRAPH_STORE_PATH") {
            self.store.path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("REPOGRAPH_LLM_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = lookup("REPOGRAPH_LLM_MODEL") {
            self.llm.model = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.similarity;
        check_unit("similarity.structural_weight", s.structural_weight)?;
        check_unit("similarity.embedding_weight", s.embedding_weight)?;
        if (s.structural_weight + s.embedding_weight - 1.0).abs() > 1e-4 {
            return Err(ConfigError::Invalid(format!(
                "similarity weights must sum to 1 (got {} + {})",
                s.structural_weight, s.embedding_weight
            )));
        }
        check_unit("similarity.edge_threshold", s.edge_threshold)?;
        check_unit("similarity.low_confidence_factor", s.low_confidence_factor)?;
        check_positive("similarity.lsh_tables", s.lsh_tables)?;
        if s.lsh_bits == 0 || s.lsh_bits > 32 {
            return Err(ConfigError::Invalid(format!(
                "similarity.lsh_bits must be in 1..=32 (got {})",
                s.lsh_bits
            )));
        }
        check_positive("similarity.top_k", s.top_k)?;

        check_positive("extraction.concurrency", self.extraction.concurrency)?;
        if self.extraction.extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "extraction.extensions must not be empty".to_string(),
            ));
        }

        let e = &self.embedding;
        check_positive("embedding.dimension", e.dimension)?;
        check_positive("embedding.concurrency", e.concurrency)?;
        check_positive("embedding.max_input_chars", e.max_input_chars)?;
        check_positive("embedding.cache_capacity", e.cache_capacity as usize)?;
        if e.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "embedding.timeout_secs must be positive".to_string(),
            ));
        }

        let x = &self.expansion;
        for (name, weight) in [
            ("expansion.identifier_weight", x.identifier_weight),
            ("expansion.word_weight", x.word_weight),
            ("expansion.subword_weight", x.subword_weight),
        ] {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive (got {weight})"
                )));
            }
        }
        check_unit("expansion.synonym_weight", x.synonym_weight)?;

        check_positive("retrieval.limit", self.retrieval.limit)?;
        if self.retrieval.rrf_k <= 0.0 {
            return Err(ConfigError::Invalid("retrieval.rrf_k must be positive".to_string()));
        }
        check_positive("llm.max_context_chars", self.llm.max_context_chars)?;
        Ok(())
    }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in [0, 1] (got {value})"
        )))
    }
}

fn check_positive(name: &str, value: usize) -> Result<(), ConfigError> {
    if value > 0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{name} must be positive")))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}: cannot parse '{value}'")))
}

fn parse_provider(value: &str) -> Result<EmbeddingProviderKind, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "ollama" => Ok(EmbeddingProviderKind::Ollama),
        "openai" => Ok(EmbeddingProviderKind::OpenAi),
        "hashing" => Ok(EmbeddingProviderKind::Hashing),
        "fastembed" => Ok(EmbeddingProviderKind::FastEmbed),
        "none" => Ok(EmbeddingProviderKind::Disabled),
        other => Err(ConfigError::Invalid(format!(
            "unknown embedding provider '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = RepographConfig::default();
        config.validate().unwrap();
        assert_eq!(config.similarity.structural_weight, 0.4);
        assert_eq!(config.similarity.embedding_weight, 0.6);
        assert_eq!(config.extraction.extensions, vec!["py".to_string()]);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RepographConfig::from_toml(
            r#"
            [similarity]
            edge_threshold = 0.85
            strategy = "bucketed"

            [embedding]
            provider = "hashing"
            dimension = 256

            [expansion.synonyms]
            login = ["auth", "signin"]
            "#,
        )
        .unwrap();
        assert_eq!(config.similarity.edge_threshold, 0.85);
        assert_eq!(config.similarity.strategy, SweepStrategy::Bucketed);
        assert_eq!(config.similarity.structural_weight, 0.4);
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::Hashing);
        assert_eq!(config.embedding.dimension, 256);
        assert_eq!(config.embedding.concurrency, 4);
        assert_eq!(
            config.expansion.synonyms.get("login"),
            Some(&vec!["auth".to_string(), "signin".to_string()])
        );
        config.validate().unwrap();
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let mut config = RepographConfig::default();
        config.similarity.structural_weight = 0.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sum to 1"));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let mut config = RepographConfig::default();
        config.similarity.edge_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = RepographConfig::default();
        config.embedding.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("REPOGRAPH_EMBEDDING_PROVIDER", "openai"),
            ("REPOGRAPH_EMBEDDING_MODEL", "text-embedding-3-small"),
            ("REPOGRAPH_EDGE_THRESHOLD", "0.9"),
            ("REPOGRAPH_STORE_PATH", "/tmp/graph.db"),
        ]
        .into_iter()
        .collect();
        let mut config = RepographConfig::default();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.embedding.provider, EmbeddingProviderKind::OpenAi);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert_eq!(config.similarity.edge_threshold, 0.9);
        assert_eq!(config.store.resolved_path(), PathBuf::from("/tmp/graph.db"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut config = RepographConfig::default();
        let result = config.apply_env_overrides(|k| {
            (k == "REPOGRAPH_EMBEDDING_CONCURRENCY").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[retrieval]\nlimit = 3\n").unwrap();
        let config = RepographConfig::from_file(&path).unwrap();
        assert_eq!(config.retrieval.limit, 3);
    }

    #[test]
    fn test_round_trip_toml() {
        let config = RepographConfig::default();
        let text = config.to_toml().unwrap();
        let back = RepographConfig::from_toml(&text).unwrap();
        assert_eq!(back.similarity.lsh_tables, config.similarity.lsh_tables);
    }
}
