//! Error taxonomy
//!
//! Failures that affect one file or one element are contained and counted in
//! the run summary. Only `IndexError` aborts a run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::retry::IsRetryable;

/// Per-file extraction failure. Logged, counted, and skipped.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid UTF-8")]
    Decode { path: PathBuf },
    #[error("syntax error in {path} at {line}:{column}")]
    Syntax {
        path: PathBuf,
        line: usize,
        column: usize,
    },
    #[error("parser failure on {path}: {reason}")]
    Parser { path: PathBuf, reason: String },
}

impl ExtractionError {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Io { path, .. }
            | Self::Decode { path }
            | Self::Syntax { path, .. }
            | Self::Parser { path, .. } => path,
        }
    }
}

/// Per-element embedding failure. Recoverable: scoring falls back to
/// structure only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingUnavailable {
    #[error("embedding service error: {message}")]
    Service { message: String, retryable: bool },
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
    #[error("embedding service rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("embedding is a zero vector")]
    ZeroVector,
    #[error("embedding contains non-finite values")]
    NonFinite,
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("nothing to embed")]
    EmptyInput,
    #[error("embedding cancelled")]
    Cancelled,
}

impl IsRetryable for EmbeddingUnavailable {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Service { retryable, .. } => *retryable,
            Self::Timeout(_) | Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// A single upsert that did not land.
#[derive(Debug, Clone, Error)]
#[error("failed to write {target}: {reason}")]
pub struct StoreWriteError {
    pub target: String,
    pub reason: String,
    pub transient: bool,
}

/// Graph store failures
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store cannot be reached at all. Fatal for a run.
    #[error("graph store unreachable: {0}")]
    Unreachable(String),
    #[error(transparent)]
    Write(#[from] StoreWriteError),
    #[error("graph store query failed: {0}")]
    Query(String),
}

impl IsRetryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Write(StoreWriteError { transient: true, .. }))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Run-level failures
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("graph store unreachable, run aborted: {0}")]
    StoreUnreachable(String),
    #[error("cannot index {path}: {reason}")]
    Root { path: PathBuf, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("background task failed: {0}")]
    Task(String),
}
