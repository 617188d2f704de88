//! Context Relay - multi-source context assembly and resilient answer
//! streaming
//!
//! This library aggregates grounding material from several upstream sources
//! (full-text search, vector similarity over transcripts, live search
//! results, content enrichment, and a hot cache of previous answers) and
//! relays token streams from a completion upstream, degrading gracefully
//! when any dependency misbehaves.
//!
//! ## Features
//!
//! - **Tiered Caching**: in-process and distributed tiers with single-flight
//!   stampede prevention
//! - **Circuit Breakers**: per-upstream failure detection and cool-down
//! - **Bounded Retries**: jittered exponential backoff for transient errors
//! - **Partial Aggregation**: a slow source costs its contribution, never
//!   the request
//! - **Streaming Relay**: one SSE protocol across live, cached, and
//!   fallback answer streams
//! - **Observability**: built-in metrics and health checks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use context_relay::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::from_file("config.toml")?;
//!
//!     let cache = Arc::new(TieredCache::new(
//!         config.cache.clone(),
//!         Arc::new(context_relay::cache::MemoryTier::new()),
//!     ));
//!     let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
//!
//!     let aggregator = ContextAggregator::new(Vec::new());
//!     let result = aggregator
//!         .build_context("why land rockets", &Default::default(), false)
//!         .await?;
//!     println!("{}", context_relay::aggregator::format_context(&result));
//!     Ok(())
//! }
//! ```

pub mod aggregator;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod relay;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use error::{RelayError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aggregator::ContextAggregator;
    pub use crate::breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
    pub use crate::cache::{CacheOptions, TieredCache};
    pub use crate::config::Config;
    pub use crate::error::{RelayError, Result};
    pub use crate::observability::{HealthChecker, MetricsCollector};
    pub use crate::relay::{StreamEvent, StreamRelay};
    pub use crate::retrieval::models::{RagResult, RetrievalContext, SourceKind, SourceToggles};
    pub use crate::retry::with_retry;
}
