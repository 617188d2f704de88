//! Context Relay Server Binary
//!
//! Entry point for running the context relay as a standalone server: loads
//! configuration, wires the configured upstream sources into the aggregator
//! and the streaming relay, and serves the HTTP API.

use context_relay::{
    aggregator::ContextAggregator,
    breaker::BreakerRegistry,
    cache::{MemoryTier, TieredCache},
    config::Config,
    observability::{HealthChecker, MetricsCollector},
    relay::{HttpCompletionClient, StreamRelay},
    retrieval::{
        http::{
            HttpEmbeddingClient, HttpEnrichmentClient, HttpLiveSearchClient, HttpQaIndex,
            HttpTranscriptIndex,
        },
        resolver::{
            EnrichmentResolver, EnvelopeAnswerStore, FullTextResolver, HotCacheResolver,
            LiveSearchResolver, SourceResolver, TranscriptResolver,
        },
        EmbeddingProvider,
    },
    server::{start_server, ServerState},
    shutdown::ShutdownCoordinator,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Environment variables may come from a .env file in development
    dotenvy::dotenv().ok();

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::from_file_with_env(&config_path)?;
    config.validate()?;

    init_tracing(&config);
    info!("Starting Context Relay Server");
    info!("Configuration loaded and validated from {}", config_path);

    let metrics = Arc::new(MetricsCollector::new());

    // Shared infrastructure
    let cache = Arc::new(TieredCache::new(
        config.cache.clone(),
        Arc::new(MemoryTier::new()),
    ));
    let breakers = Arc::new(BreakerRegistry::new(config.breaker.clone()));
    let retry = config.retry.clone();

    // Wire every configured source into the aggregator. Unconfigured
    // sources are simply absent.
    let mut resolvers: Vec<Arc<dyn SourceResolver>> = Vec::new();

    if let Some(qa_index) = HttpQaIndex::new(&config.sources.full_text)? {
        resolvers.push(Arc::new(FullTextResolver::new(
            Arc::new(qa_index),
            cache.clone(),
            breakers.clone(),
            retry.clone(),
            config.sources.full_text.clone(),
        )));
        info!("Full-text source enabled");
    }

    if let Some(transcript_index) = HttpTranscriptIndex::new(&config.sources.vector)? {
        let embeddings: Option<Arc<dyn EmbeddingProvider>> =
            match HttpEmbeddingClient::new(&config.sources.embedding)? {
                Some(client) => Some(Arc::new(client)),
                None => {
                    info!("Embeddings not configured, transcript ranking is lexical-only");
                    None
                }
            };
        resolvers.push(Arc::new(TranscriptResolver::new(
            Arc::new(transcript_index),
            embeddings,
            cache.clone(),
            breakers.clone(),
            retry.clone(),
            config.sources.vector.clone(),
            config.hybrid,
        )));
        info!("Transcript source enabled");
    }

    resolvers.push(Arc::new(HotCacheResolver::new(
        Arc::new(EnvelopeAnswerStore::new(cache.clone())),
        breakers.clone(),
        retry.clone(),
        config.sources.hot_cache.clone(),
    )));

    if let Some(live_search) = HttpLiveSearchClient::new(&config.sources.live_search)? {
        resolvers.push(Arc::new(LiveSearchResolver::new(
            Arc::new(live_search),
            cache.clone(),
            breakers.clone(),
            retry.clone(),
            config.sources.live_search.clone(),
        )));
        info!("Live search source enabled");
    }

    if let Some(enrichment) = HttpEnrichmentClient::new(&config.sources.enrichment)? {
        resolvers.push(Arc::new(EnrichmentResolver::new(
            Arc::new(enrichment),
            cache.clone(),
            breakers.clone(),
            retry.clone(),
            config.sources.enrichment.clone(),
        )));
        info!("Enrichment source enabled");
    }

    let aggregator = Arc::new(ContextAggregator::new(resolvers));
    info!("Context aggregator initialized");

    let completion_configured = config.completion.is_configured();
    let completion = match HttpCompletionClient::new(&config.completion)? {
        Some(client) => {
            info!(model = %config.completion.model, "Completion upstream enabled");
            Some(Arc::new(client) as Arc<dyn context_relay::relay::CompletionClient>)
        }
        None => {
            info!("Completion upstream not configured, serving fallback streams");
            None
        }
    };
    let relay = StreamRelay::new(
        completion,
        cache.clone(),
        breakers.clone(),
        config.relay.clone(),
        config.cache.clone(),
    )
    .with_metrics(metrics.clone());

    let health_checker = Arc::new(
        HealthChecker::new()
            .with_breakers(breakers.clone())
            .with_cache(cache.clone())
            .with_completion_configured(completion_configured),
    );
    info!("Health checker initialized");

    let coordinator = Arc::new(ShutdownCoordinator::new());

    // Periodically drop breakers for upstreams that went quiet
    {
        let breakers = breakers.clone();
        let notifier = coordinator.subscribe();
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = breakers.evict_idle();
                        if evicted > 0 {
                            info!(evicted, "Evicted idle circuit breakers");
                        }
                    }
                    _ = notifier.wait() => break,
                }
            }
        });
    }

    let state = ServerState {
        aggregator,
        relay,
        cache,
        breakers,
        health_checker,
        metrics_collector: metrics,
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let max_body_bytes = config.server.max_body_size_mb * 1024 * 1024;

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        signal_coordinator.wait_for_signal().await;
    });

    start_server(&addr, state, max_body_bytes, coordinator.subscribe()).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match config.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_env_filter(filter)
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .compact()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_env_filter(filter)
                .init();
        }
    }
}
