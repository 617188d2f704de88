//! Health check endpoints and monitoring

use crate::breaker::{BreakerRegistry, CircuitState};
use crate::cache::TieredCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Component health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,

    /// Health status
    pub status: HealthStatus,

    /// Optional message
    pub message: Option<String>,
}

/// Overall system health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    /// Overall status
    pub status: HealthStatus,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// Component health checks
    pub components: Vec<ComponentHealth>,

    /// Timestamp
    pub timestamp: i64,
}

/// Cached health check result
#[derive(Debug, Clone)]
struct CachedHealth {
    result: SystemHealth,
    cached_at: Instant,
}

/// Health checker with caching
pub struct HealthChecker {
    start_time: Instant,
    breakers: Option<Arc<BreakerRegistry>>,
    cache: Option<Arc<TieredCache>>,
    completion_configured: bool,
    cached_result: Arc<RwLock<Option<CachedHealth>>>,
    cache_ttl: Duration,
}

impl HealthChecker {
    /// Create a new health checker with default 30-second cache TTL
    pub fn new() -> Self {
        Self::with_cache_ttl(Duration::from_secs(30))
    }

    /// Create a new health checker with custom cache TTL
    pub fn with_cache_ttl(cache_ttl: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            breakers: None,
            cache: None,
            completion_configured: false,
            cached_result: Arc::new(RwLock::new(None)),
            cache_ttl,
        }
    }

    /// Set breaker registry for health checks
    pub fn with_breakers(mut self, breakers: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(breakers);
        self
    }

    /// Set tiered cache for health checks
    pub fn with_cache(mut self, cache: Arc<TieredCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Mark whether the completion upstream is configured
    pub fn with_completion_configured(mut self, configured: bool) -> Self {
        self.completion_configured = configured;
        self
    }

    /// Check overall system health with caching
    pub async fn check_health(&self) -> SystemHealth {
        {
            let cached = self.cached_result.read().await;
            if let Some(cached_health) = &*cached {
                if cached_health.cached_at.elapsed() < self.cache_ttl {
                    debug!("Returning cached health check result");
                    return cached_health.result.clone();
                }
            }
        }

        debug!("Performing fresh health check");
        let health = self.perform_health_check().await;

        {
            let mut cached = self.cached_result.write().await;
            *cached = Some(CachedHealth {
                result: health.clone(),
                cached_at: Instant::now(),
            });
        }

        health
    }

    async fn perform_health_check(&self) -> SystemHealth {
        let components = vec![
            self.check_breakers(),
            self.check_cache().await,
            self.check_completion(),
        ];

        let status = if components.iter().all(|c| c.status == HealthStatus::Healthy) {
            HealthStatus::Healthy
        } else if components.iter().any(|c| c.status == HealthStatus::Unhealthy) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        SystemHealth {
            status,
            uptime_secs: self.start_time.elapsed().as_secs(),
            components,
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Force refresh health check (bypass cache)
    pub async fn check_health_fresh(&self) -> SystemHealth {
        let health = self.perform_health_check().await;

        let mut cached = self.cached_result.write().await;
        *cached = Some(CachedHealth {
            result: health.clone(),
            cached_at: Instant::now(),
        });

        health
    }

    /// One open circuit degrades the system; every circuit open means no
    /// upstream is reachable at all
    fn check_breakers(&self) -> ComponentHealth {
        let Some(registry) = &self.breakers else {
            return ComponentHealth {
                name: "circuit_breakers".to_string(),
                status: HealthStatus::Degraded,
                message: Some("Not configured".to_string()),
            };
        };

        let stats = registry.get_stats();
        let open: Vec<String> = stats
            .iter()
            .filter(|(_, s)| s.state == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect();

        if open.is_empty() {
            ComponentHealth {
                name: "circuit_breakers".to_string(),
                status: HealthStatus::Healthy,
                message: Some(format!("{} circuits, all conducting", stats.len())),
            }
        } else if open.len() == stats.len() && !stats.is_empty() {
            ComponentHealth {
                name: "circuit_breakers".to_string(),
                status: HealthStatus::Unhealthy,
                message: Some("All circuits open".to_string()),
            }
        } else {
            ComponentHealth {
                name: "circuit_breakers".to_string(),
                status: HealthStatus::Degraded,
                message: Some(format!("Open circuits: {}", open.join(", "))),
            }
        }
    }

    async fn check_cache(&self) -> ComponentHealth {
        let Some(cache) = &self.cache else {
            return ComponentHealth {
                name: "cache".to_string(),
                status: HealthStatus::Degraded,
                message: Some("Not configured".to_string()),
            };
        };

        let stats = cache.stats().await;
        let reads = stats.l1_hits + stats.l2_hits + stats.loader_loads;
        let hit_rate = if reads > 0 {
            (stats.l1_hits + stats.l2_hits) as f64 / reads as f64
        } else {
            0.0
        };

        ComponentHealth {
            name: "cache".to_string(),
            status: HealthStatus::Healthy,
            message: Some(format!(
                "Cache operational (hit rate: {:.1}%, entries: {})",
                hit_rate * 100.0,
                stats.l1_entries
            )),
        }
    }

    fn check_completion(&self) -> ComponentHealth {
        if self.completion_configured {
            ComponentHealth {
                name: "completion_upstream".to_string(),
                status: HealthStatus::Healthy,
                message: Some("Configured".to_string()),
            }
        } else {
            ComponentHealth {
                name: "completion_upstream".to_string(),
                status: HealthStatus::Degraded,
                message: Some("Not configured, fallback streaming only".to_string()),
            }
        }
    }

    /// Simple liveness check
    pub fn liveness(&self) -> bool {
        true
    }

    /// Readiness check
    pub async fn readiness(&self) -> bool {
        let health = self.check_health().await;
        health.status != HealthStatus::Unhealthy
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}
