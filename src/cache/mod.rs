//! Tiered caching: a short-TTL in-process tier backed by a longer-TTL
//! distributed tier backed by an authoritative loader, with single-flight
//! stampede prevention and a persisted response envelope.

pub mod envelope;
pub mod tier;
pub mod tiered;

pub use envelope::ResponseEnvelope;
pub use tier::{DistributedTier, MemoryTier, NoopTier};
pub use tiered::{CacheLevel, CacheOptions, CacheOutcome, CacheStats, TieredCache};
