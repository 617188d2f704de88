//! Distributed tier-2 capability interface
//!
//! The tiered cache depends on this trait, not on whether a concrete backend
//! is present. Deployments without a shared cache wire in [`NoopTier`].

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

/// Shared medium-TTL cache tier
#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    /// Remove every entry matching a glob-like pattern, returning the count
    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize>;
}

/// Match a glob-like pattern with at most one `*` wildcard.
///
/// Callers rely only on namespace prefixes (`rag:fulltext:*`), but a bare
/// `*` and infix patterns work too.
pub(crate) fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
        None => pattern == key,
    }
}

/// In-memory tier-2 for single-process deployments and tests
pub struct MemoryTier {
    entries: DashMap<String, (Value, Instant)>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(entry) = self.entries.get(key) {
            let (value, expires) = entry.value();
            if Instant::now() < *expires {
                return Ok(Some(value.clone()));
            }
        }
        // Expired entries are dropped lazily on read
        self.entries
            .remove_if(key, |_, (_, expires)| Instant::now() >= *expires);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<()> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        // Counted inside the closure; concurrent inserts make a
        // before/after length delta unreliable
        let mut removed = 0usize;
        self.entries.retain(|key, _| {
            let keep = !key_matches(pattern, key);
            if !keep {
                removed += 1;
            }
            keep
        });
        debug!(pattern, removed, "Invalidated distributed tier entries");
        Ok(removed)
    }
}

/// Null tier for deployments without a shared cache
pub struct NoopTier;

#[async_trait]
impl DistributedTier for NoopTier {
    async fn get(&self, _key: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn invalidate_pattern(&self, _pattern: &str) -> Result<usize> {
        Ok(0)
    }
}
