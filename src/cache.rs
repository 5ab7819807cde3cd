//! Run-scoped resolution cache.
//!
//! Keyed by `(source, discriminator, key)`, e.g. `("imdb", "title", "tt0113277")`
//! or `("themoviedb", "search", "movie|heat|1995")`. Entries are written
//! once and never expire; the cache lives as long as the [`ScanSession`]
//! that owns it.
//!
//! [`ScanSession`]: crate::plugin::ScanSession

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::PluginError;

/// Cache key for one expensive lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: String,
    pub discriminator: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(source: &str, discriminator: &str, key: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            discriminator: discriminator.to_string(),
            key: key.into(),
        }
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Process-wide, write-once map shared by concurrent scans.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct ResolutionCache {
    entries: Arc<RwLock<HashMap<CacheKey, Arc<Value>>>>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &CacheKey) -> Option<Arc<Value>> {
        let found = self.entries.read().await.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Typed read; entries that no longer deserialize count as absent.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let value = self.get(key).await?;
        T::deserialize(value.as_ref()).ok()
    }

    /// Insert unless the key is already present. Returns whether it was stored.
    pub async fn put(&self, key: CacheKey, value: Value) -> bool {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&key) {
            return false;
        }
        entries.insert(key, Arc::new(value));
        true
    }

    pub async fn put_as<T: Serialize>(&self, key: CacheKey, value: &T) -> Result<bool, serde_json::Error> {
        let value = serde_json::to_value(value)?;
        Ok(self.put(key, value).await)
    }

    /// Return the cached value or run `fetch` and cache its success.
    ///
    /// Failures are not cached. Two tasks missing the same key at once may
    /// both fetch; the first insert wins and both get a valid value.
    pub async fn get_or_fetch<T, F, Fut>(&self, key: CacheKey, fetch: F) -> Result<T, PluginError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, PluginError>>,
    {
        if let Some(cached) = self.get_as::<T>(&key).await {
            debug!(source = %key.source, kind = %key.discriminator, key = %key.key, "cache hit");
            return Ok(cached);
        }

        let value = fetch().await?;
        self.put_as(key, &value).await?;
        Ok(value)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len().await,
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
