//! Observability: health checks and metrics

pub mod health;
pub mod metrics;

pub use health::{ComponentHealth, HealthChecker, HealthStatus, SystemHealth};
pub use metrics::{MetricsCollector, SystemMetrics};
