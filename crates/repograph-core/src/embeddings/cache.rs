//! Embedding cache keyed by normalized content hash
//!
//! Concurrent reads, at most one stored value per key. When two callers
//! compute the same key at once, the first insert wins and the later result
//! is discarded and counted.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use moka::sync::Cache;
use serde::Serialize;
use tracing::trace;

use super::Embedding;
use crate::error::EmbeddingUnavailable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Computations discarded because another writer got there first
    pub duplicates: u64,
    pub entries: u64,
}

pub struct EmbeddingCache {
    inner: Cache<String, Embedding>,
    hits: AtomicU64,
    misses: AtomicU64,
    duplicates: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::new(capacity),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &str) -> Option<Embedding> {
        self.inner.get(key)
    }

    /// Store `value` unless the key is already present; returns the stored value
    pub fn insert_first(&self, key: &str, value: Embedding) -> Embedding {
        let entry = self.inner.entry(key.to_string()).or_insert(value);
        if !entry.is_fresh() {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            trace!(key, "Discarded duplicate embedding");
        }
        entry.into_value()
    }

    /// Return the cached embedding or compute and store it.
    ///
    /// Errors from `compute` are returned and never cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<Embedding, EmbeddingUnavailable>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Embedding, EmbeddingUnavailable>>,
    {
        if let Some(hit) = self.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let computed = compute().await?;
        Ok(self.insert_first(key, computed))
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            entries: self.inner.entry_count(),
        }
    }
}
