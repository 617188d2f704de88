//! Configuration management for the context relay

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod loader;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub hybrid: HybridWeights,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Tiered cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Tier-1 (process-local) default TTL in seconds
    #[serde(default = "default_l1_ttl")]
    pub l1_ttl_secs: u64,

    /// Tier-2 (distributed) default TTL in seconds
    #[serde(default = "default_l2_ttl")]
    pub l2_ttl_secs: u64,

    /// Maximum tier-1 entries
    #[serde(default = "default_l1_max_entries")]
    pub l1_max_entries: u64,

    /// Persisted response TTL in seconds
    #[serde(default = "default_response_ttl")]
    pub response_ttl_secs: i64,

    /// Compress persisted responses above this many bytes
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_ttl_secs: default_l1_ttl(),
            l2_ttl_secs: default_l2_ttl(),
            l1_max_entries: default_l1_max_entries(),
            response_ttl_secs: default_response_ttl(),
            compression_threshold_bytes: default_compression_threshold(),
        }
    }
}

/// Circuit breaker configuration, applied per upstream dependency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Hard timeout applied to every wrapped call, in milliseconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// Cool-down before an open circuit allows a probe, in milliseconds
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,

    /// Probe budget while half-open
    #[serde(default = "default_half_open_max")]
    pub half_open_max_attempts: u32,

    /// Evict closed breakers idle for this many seconds
    #[serde(default = "default_breaker_idle_ttl")]
    pub idle_ttl_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            call_timeout_ms: default_call_timeout(),
            reset_timeout_ms: default_reset_timeout(),
            half_open_max_attempts: default_half_open_max(),
            idle_ttl_secs: default_breaker_idle_ttl(),
        }
    }
}

/// Retry executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Per-source upstream endpoints and aggregation timeouts
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourcesConfig {
    #[serde(default)]
    pub full_text: FullTextConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub hot_cache: HotCacheConfig,
    #[serde(default)]
    pub live_search: LiveSearchConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Full-text search index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullTextConfig {
    /// Search endpoint URL (unset = source disabled)
    pub url: Option<String>,

    /// Aggregation timeout for this source, in milliseconds
    #[serde(default = "default_full_text_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_source_limit")]
    pub limit: usize,
}

impl Default for FullTextConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_full_text_timeout(),
            limit: default_source_limit(),
        }
    }
}

/// Vector similarity index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    /// Vector search endpoint URL (unset = source disabled)
    pub url: Option<String>,

    #[serde(default = "default_vector_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_source_limit")]
    pub limit: usize,

    /// Drop vector-only matches below this cosine similarity
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_vector_timeout(),
            limit: default_source_limit(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

/// Embeddings endpoint backing the vector resolver
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmbeddingConfig {
    /// Embeddings API URL (unset = lexical-only ranking)
    pub api_url: Option<String>,

    /// API authentication token (secured)
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub api_token: Option<Secret<String>>,

    #[serde(default = "default_embedding_model")]
    pub model: String,
}

/// Hot-content cache lookup source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotCacheConfig {
    #[serde(default = "default_hot_cache_timeout")]
    pub timeout_ms: u64,
}

impl Default for HotCacheConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_hot_cache_timeout(),
        }
    }
}

/// External live web/search-results provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSearchConfig {
    /// Provider API URL (unset = source disabled)
    pub api_url: Option<String>,

    /// API key (secured)
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub api_key: Option<Secret<String>>,

    #[serde(default = "default_live_search_timeout")]
    pub timeout_ms: u64,
}

impl Default for LiveSearchConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            timeout_ms: default_live_search_timeout(),
        }
    }
}

/// External content-enrichment provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Provider API URL (unset = source disabled)
    pub api_url: Option<String>,

    #[serde(default = "default_enrichment_timeout")]
    pub timeout_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            timeout_ms: default_enrichment_timeout(),
        }
    }
}

/// Weight split for hybrid lexical + vector ranking
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridWeights {
    #[serde(default = "default_text_weight")]
    pub text: f32,

    #[serde(default = "default_vector_weight")]
    pub vector: f32,
}

impl Default for HybridWeights {
    fn default() -> Self {
        Self {
            text: default_text_weight(),
            vector: default_vector_weight(),
        }
    }
}

/// Token-streaming completion upstream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Completion API URL (unset = fallback streaming only)
    pub api_url: Option<String>,

    /// API authentication token (secured)
    #[serde(
        default,
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub api_token: Option<Secret<String>>,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            provider: default_provider(),
            model: default_model(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

impl CompletionConfig {
    /// Whether enough is configured to attempt a live completion call
    pub fn is_configured(&self) -> bool {
        self.api_url.is_some()
            && self
                .api_token
                .as_ref()
                .map(|t| !t.expose_secret().is_empty())
                .unwrap_or(false)
    }
}

/// Streaming relay behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Pacing interval between synthesized fallback chunks, in milliseconds
    #[serde(default = "default_pacing")]
    pub fallback_pacing_ms: u64,

    /// Words per synthesized fallback chunk
    #[serde(default = "default_chunk_words")]
    pub fallback_chunk_words: usize,

    /// Static text streamed when nothing better exists
    #[serde(default = "default_fallback_text")]
    pub fallback_text: String,

    /// Event channel capacity between producer and consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            fallback_pacing_ms: default_pacing(),
            fallback_chunk_words: default_chunk_words(),
            fallback_text: default_fallback_text(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,

    #[serde(default = "default_server_host")]
    pub host: String,

    /// Maximum request body size in MB
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
            max_body_size_mb: default_max_body_size(),
        }
    }
}

// Default value functions
fn default_l1_ttl() -> u64 { 300 } // 5 minutes
fn default_l2_ttl() -> u64 { 3600 } // 1 hour
fn default_l1_max_entries() -> u64 { 10_000 }
fn default_response_ttl() -> i64 { 86400 } // 24 hours
fn default_compression_threshold() -> usize { 4096 }
fn default_failure_threshold() -> u32 { 5 }
fn default_call_timeout() -> u64 { 10_000 }
fn default_reset_timeout() -> u64 { 30_000 }
fn default_half_open_max() -> u32 { 3 }
fn default_breaker_idle_ttl() -> u64 { 1800 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_delay() -> u64 { 100 }
fn default_max_delay() -> u64 { 5_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_full_text_timeout() -> u64 { 800 }
fn default_vector_timeout() -> u64 { 1_500 }
fn default_hot_cache_timeout() -> u64 { 500 }
fn default_live_search_timeout() -> u64 { 3_000 }
fn default_enrichment_timeout() -> u64 { 10_000 }
fn default_source_limit() -> usize { 8 }
fn default_similarity_threshold() -> f32 { 0.55 }
fn default_text_weight() -> f32 { 0.3 }
fn default_vector_weight() -> f32 { 0.7 }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_provider() -> String { "openai".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_completion_timeout() -> u64 { 60 }
fn default_pacing() -> u64 { 35 }
fn default_chunk_words() -> usize { 4 }
fn default_fallback_text() -> String {
    "I could not reach the answer service just now. Please try again shortly.".to_string()
}
fn default_channel_capacity() -> usize { 64 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }
fn default_server_port() -> u16 { 8080 }
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_max_body_size() -> usize { 2 }

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        loader::load_config(path)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        loader::load_config_with_env(path)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        loader::validate_config(self)
    }
}

/// Custom serializer for Option<Secret<String>>
fn serialize_optional_secret<S>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

/// Custom deserializer for Option<Secret<String>>
fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.map(Secret::new))
}
