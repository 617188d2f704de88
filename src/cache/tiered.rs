//! Two-tier read-through cache with single-flight stampede prevention

use super::tier::{key_matches, DistributedTier};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use dashmap::DashMap;
use moka::future::Cache;
use moka::Expiry;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Which tier satisfied a `get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    L1,
    L2,
    Loader,
}

/// Result of a cache read
#[derive(Debug)]
pub struct CacheOutcome<T> {
    pub data: T,
    /// False only when the loader ran
    pub hit: bool,
    pub level: CacheLevel,
    pub latency: Duration,
}

/// Per-call overrides
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheOptions {
    pub l1_ttl: Option<Duration>,
    pub l2_ttl: Option<Duration>,
    /// Bypass both tiers, call the loader, then repopulate
    pub force_refresh: bool,
}

/// Cache read counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub loader_loads: u64,
    pub l1_entries: u64,
}

/// Tier-1 entry carrying its own TTL so per-call overrides work
#[derive(Clone)]
struct StoredValue {
    value: Arc<Value>,
    ttl: Duration,
}

struct PerEntryExpiry;

impl Expiry<String, StoredValue> for PerEntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: std::time::Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-wide tiered cache.
///
/// Lookup order is tier-1 (moka, short TTL) -> tier-2 (distributed, longer
/// TTL) -> loader. A tier-2 or loader hit rewrites tier-1. Concurrent gets
/// for one key share a single in-flight loader invocation. Tier-2 failures
/// degrade silently; loader failures propagate unchanged.
pub struct TieredCache {
    l1: Cache<String, StoredValue>,
    l2: Arc<dyn DistributedTier>,
    config: CacheConfig,
    flights: DashMap<String, Arc<Mutex<()>>>,
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    loader_loads: AtomicU64,
}

impl TieredCache {
    pub fn new(config: CacheConfig, l2: Arc<dyn DistributedTier>) -> Self {
        let l1 = Cache::builder()
            .max_capacity(config.l1_max_entries)
            .expire_after(PerEntryExpiry)
            .build();

        Self {
            l1,
            l2,
            config,
            flights: DashMap::new(),
            l1_hits: AtomicU64::new(0),
            l2_hits: AtomicU64::new(0),
            loader_loads: AtomicU64::new(0),
        }
    }

    fn l1_ttl(&self, opts: &CacheOptions) -> Duration {
        opts.l1_ttl
            .unwrap_or(Duration::from_secs(self.config.l1_ttl_secs))
    }

    fn l2_ttl(&self, opts: &CacheOptions) -> Duration {
        opts.l2_ttl
            .unwrap_or(Duration::from_secs(self.config.l2_ttl_secs))
    }

    /// Read through the tiers, falling back to `loader`
    pub async fn get<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        opts: CacheOptions,
    ) -> Result<CacheOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let start = Instant::now();

        if !opts.force_refresh {
            if let Some(stored) = self.l1.get(key).await {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Tier-1 hit");
                return Ok(CacheOutcome {
                    data: decode(&stored.value)?,
                    hit: true,
                    level: CacheLevel::L1,
                    latency: start.elapsed(),
                });
            }
        }

        // Single-flight: one loader invocation per key, concurrent callers
        // wait and re-read the tiers the winner populated.
        let flight = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = flight.lock().await;

        let outcome = self.get_locked(key, loader, &opts, start).await;

        drop(guard);
        self.flights
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 2);

        outcome
    }

    async fn get_locked<T, F, Fut>(
        &self,
        key: &str,
        loader: F,
        opts: &CacheOptions,
        start: Instant,
    ) -> Result<CacheOutcome<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !opts.force_refresh {
            // A concurrent flight may have populated tier-1 while we waited
            if let Some(stored) = self.l1.get(key).await {
                self.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(CacheOutcome {
                    data: decode(&stored.value)?,
                    hit: true,
                    level: CacheLevel::L1,
                    latency: start.elapsed(),
                });
            }

            match self.l2.get(key).await {
                Ok(Some(value)) => {
                    self.l2_hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "Tier-2 hit, promoting to tier-1");
                    let arc = Arc::new(value);
                    self.l1
                        .insert(
                            key.to_string(),
                            StoredValue {
                                value: arc.clone(),
                                ttl: self.l1_ttl(opts),
                            },
                        )
                        .await;
                    return Ok(CacheOutcome {
                        data: decode(&arc)?,
                        hit: true,
                        level: CacheLevel::L2,
                        latency: start.elapsed(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    // Distributed tier unavailability degrades to the loader
                    warn!(key, error = %e, "Tier-2 read failed, degrading");
                }
            }
        }

        self.loader_loads.fetch_add(1, Ordering::Relaxed);
        let data = loader().await?;
        let value = serde_json::to_value(&data).map_err(CacheError::Serialization)?;
        self.store(key, value, opts).await;

        Ok(CacheOutcome {
            data,
            hit: false,
            level: CacheLevel::Loader,
            latency: start.elapsed(),
        })
    }

    async fn store(&self, key: &str, value: Value, opts: &CacheOptions) {
        let arc = Arc::new(value);
        self.l1
            .insert(
                key.to_string(),
                StoredValue {
                    value: arc.clone(),
                    ttl: self.l1_ttl(opts),
                },
            )
            .await;

        if let Err(e) = self
            .l2
            .set(key, arc.as_ref().clone(), self.l2_ttl(opts))
            .await
        {
            warn!(key, error = %e, "Tier-2 write failed, tier-1 only");
        }
    }

    /// Read the tiers without a loader; misses are not cached
    pub async fn peek<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        if let Some(stored) = self.l1.get(key).await {
            self.l1_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(decode(&stored.value)?));
        }

        match self.l2.get(key).await {
            Ok(Some(value)) => {
                self.l2_hits.fetch_add(1, Ordering::Relaxed);
                let arc = Arc::new(value);
                self.l1
                    .insert(
                        key.to_string(),
                        StoredValue {
                            value: arc.clone(),
                            ttl: Duration::from_secs(self.config.l1_ttl_secs),
                        },
                    )
                    .await;
                Ok(Some(decode(&arc)?))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "Tier-2 read failed during peek");
                Ok(None)
            }
        }
    }

    /// Write a value into both tiers
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, opts: CacheOptions) -> Result<()> {
        let value = serde_json::to_value(value).map_err(CacheError::Serialization)?;
        self.store(key, value, &opts).await;
        Ok(())
    }

    /// Remove a key from both tiers
    pub async fn del(&self, key: &str) -> Result<()> {
        self.l1.invalidate(key).await;
        if let Err(e) = self.l2.del(key).await {
            warn!(key, error = %e, "Tier-2 delete failed");
        }
        Ok(())
    }

    /// Remove entries matching a glob-like pattern from both tiers.
    ///
    /// The returned count is per tier entry, not per unique key: a key
    /// held in both tiers contributes two to the total. Tier 2 only
    /// reports how many entries it dropped, so a unique-key count is not
    /// available here.
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<usize> {
        self.l1.run_pending_tasks().await;
        let matching: Vec<String> = self
            .l1
            .iter()
            .filter(|(key, _)| key_matches(pattern, key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        let mut count = matching.len();
        for key in matching {
            self.l1.invalidate(&key).await;
        }

        match self.l2.invalidate_pattern(pattern).await {
            Ok(n) => count += n,
            Err(e) => warn!(pattern, error = %e, "Tier-2 pattern invalidation failed"),
        }

        debug!(pattern, count, "Invalidated cache entries");
        Ok(count)
    }

    pub async fn stats(&self) -> CacheStats {
        self.l1.run_pending_tasks().await;
        CacheStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            loader_loads: self.loader_loads.load(Ordering::Relaxed),
            l1_entries: self.l1.entry_count(),
        }
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T> {
    serde_json::from_value(value.clone())
        .map_err(|e| CacheError::Serialization(e).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::{MemoryTier, NoopTier};
    use crate::error::{RelayError, RetrievalError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    fn test_cache(l2: Arc<dyn DistributedTier>) -> TieredCache {
        TieredCache::new(CacheConfig::default(), l2)
    }

    #[tokio::test]
    async fn test_loader_then_l1() {
        let cache = test_cache(Arc::new(MemoryTier::new()));
        let loads = AtomicU32::new(0);

        let first = cache
            .get(
                "k",
                || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok("hello".to_string())
                },
                CacheOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(first.level, CacheLevel::Loader);
        assert!(!first.hit);

        let second = cache
            .get(
                "k",
                || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok("other".to_string())
                },
                CacheOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(second.level, CacheLevel::L1);
        assert!(second.hit);
        assert_eq!(second.data, "hello");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_l2_hit_promotes_to_l1() {
        let l2 = Arc::new(MemoryTier::new());
        l2.set("k", serde_json::json!("warm"), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = test_cache(l2);

        let outcome: CacheOutcome<String> = cache
            .get("k", || async { Ok("cold".to_string()) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.level, CacheLevel::L2);
        assert_eq!(outcome.data, "warm");

        // Now served locally without a tier-2 round trip
        let outcome: CacheOutcome<String> = cache
            .get("k", || async { Ok("cold".to_string()) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.level, CacheLevel::L1);
    }

    #[tokio::test]
    async fn test_single_flight_shares_loader() {
        let cache = Arc::new(test_cache(Arc::new(NoopTier)));
        let loads = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get(
                        "shared",
                        || async move {
                            loads.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Ok(42u32)
                        },
                        CacheOptions::default(),
                    )
                    .await
                    .unwrap()
                    .data
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_tiers() {
        let cache = test_cache(Arc::new(MemoryTier::new()));
        cache
            .set("k", &"stale".to_string(), CacheOptions::default())
            .await
            .unwrap();

        let outcome = cache
            .get(
                "k",
                || async { Ok("fresh".to_string()) },
                CacheOptions {
                    force_refresh: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.data, "fresh");
        assert_eq!(outcome.level, CacheLevel::Loader);

        // Both tiers were repopulated
        let outcome: CacheOutcome<String> = cache
            .get("k", || async { Ok("reload".to_string()) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.data, "fresh");
        assert!(outcome.hit);
    }

    #[tokio::test]
    async fn test_loader_failure_propagates() {
        let cache = test_cache(Arc::new(NoopTier));

        let result: Result<CacheOutcome<String>> = cache
            .get(
                "k",
                || async { Err(RetrievalError::Upstream("db down".to_string()).into()) },
                CacheOptions::default(),
            )
            .await;

        assert!(matches!(
            result,
            Err(RelayError::Retrieval(RetrievalError::Upstream(_)))
        ));
    }

    struct FailingTier;

    #[async_trait]
    impl DistributedTier for FailingTier {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(CacheError::Tier("redis unreachable".to_string()).into())
        }
        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<()> {
            Err(CacheError::Tier("redis unreachable".to_string()).into())
        }
        async fn del(&self, _key: &str) -> Result<()> {
            Err(CacheError::Tier("redis unreachable".to_string()).into())
        }
        async fn invalidate_pattern(&self, _pattern: &str) -> Result<usize> {
            Err(CacheError::Tier("redis unreachable".to_string()).into())
        }
    }

    #[tokio::test]
    async fn test_l2_failure_degrades_silently() {
        let cache = test_cache(Arc::new(FailingTier));

        let outcome = cache
            .get("k", || async { Ok(7u32) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.data, 7);
        assert_eq!(outcome.level, CacheLevel::Loader);

        // Tier-1 still works despite the broken tier-2
        let outcome = cache
            .get("k", || async { Ok(0u32) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.data, 7);
        assert_eq!(outcome.level, CacheLevel::L1);
    }

    #[tokio::test]
    async fn test_pattern_invalidation_spans_tiers() {
        let cache = test_cache(Arc::new(MemoryTier::new()));
        for i in 0..3 {
            cache
                .set(&format!("rag:serp:{}", i), &i, CacheOptions::default())
                .await
                .unwrap();
        }
        cache.set("rag:qa:0", &9, CacheOptions::default()).await.unwrap();

        let count = cache.invalidate_pattern("rag:serp:*").await.unwrap();
        // Each key was present in both tiers
        assert_eq!(count, 6);

        let outcome = cache
            .get("rag:serp:0", || async { Ok(100u32) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.level, CacheLevel::Loader);
    }

    #[tokio::test]
    async fn test_per_call_l1_ttl_override() {
        let cache = test_cache(Arc::new(NoopTier));
        let opts = CacheOptions {
            l1_ttl: Some(Duration::from_millis(30)),
            ..Default::default()
        };

        cache.set("k", &1u32, opts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        let outcome = cache
            .get("k", || async { Ok(2u32) }, CacheOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.data, 2);
        assert_eq!(outcome.level, CacheLevel::Loader);
    }
}
