//! Per-source resolvers composing cache, circuit breaker, and retry
//!
//! Every resolver follows the same shape: build a namespaced cache key,
//! read through the tiered cache, and on a miss call the upstream behind
//! its circuit breaker with bounded retries. The aggregator applies each
//! source's time budget around `resolve`.

use super::hybrid::{apply_similarity_threshold, merge_hybrid, sort_hits};
use super::key::cache_key;
use super::models::{ContextPayload, RelevanceScores, RetrievalContext, SourceKind};
use super::providers::{
    EmbeddingProvider, EnrichmentProvider, HotContentStore, HotEntry, LiveSearchProvider, QaIndex,
    TranscriptHit, TranscriptIndex,
};
use crate::breaker::BreakerRegistry;
use crate::cache::{CacheOptions, ResponseEnvelope, TieredCache};
use crate::config::{
    EnrichmentConfig, FullTextConfig, HotCacheConfig, HybridWeights, LiveSearchConfig, RetryConfig,
    VectorConfig,
};
use crate::error::Result;
use crate::retry::with_retry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache namespace for query embeddings
const EMBED_NAMESPACE: &str = "rag:embed";

/// One retrieval source the aggregator can fan out to
#[async_trait]
pub trait SourceResolver: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Time budget the aggregator applies around `resolve`
    fn budget(&self) -> Duration;

    async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Vec<RetrievalContext>>;
}

fn options(force_refresh: bool) -> CacheOptions {
    CacheOptions {
        force_refresh,
        ..Default::default()
    }
}

/// Full-text Q&A index resolver
pub struct FullTextResolver {
    index: Arc<dyn QaIndex>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    config: FullTextConfig,
}

impl FullTextResolver {
    pub fn new(
        index: Arc<dyn QaIndex>,
        cache: Arc<TieredCache>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        config: FullTextConfig,
    ) -> Self {
        Self {
            index,
            cache,
            breakers,
            retry,
            config,
        }
    }
}

#[async_trait]
impl SourceResolver for FullTextResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::TextIndex
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Vec<RetrievalContext>> {
        let limit = self.config.limit;
        let limit_s = limit.to_string();
        let key = cache_key(self.kind().namespace(), &[query, limit_s.as_str()]);
        let breaker = self.breakers.get("qa_index");
        let index = self.index.clone();
        let retry = self.retry.clone();
        let query = query.to_string();

        let outcome = self
            .cache
            .get(
                &key,
                || async move {
                    with_retry(&retry, || {
                        let breaker = breaker.clone();
                        let index = index.clone();
                        let query = query.clone();
                        async move { breaker.execute(|| index.search(&query, limit)).await }
                    })
                    .await
                },
                options(force_refresh),
            )
            .await?;

        let hits: Vec<super::providers::QaHit> = outcome.data;
        Ok(hits
            .into_iter()
            .map(|hit| {
                RetrievalContext::new(
                    SourceKind::TextIndex,
                    ContextPayload::QuestionAnswer {
                        question: hit.question,
                        answer: hit.answer,
                    },
                )
                .with_scores(RelevanceScores {
                    text_rank: Some(hit.rank),
                    ..Default::default()
                })
            })
            .collect())
    }
}

/// Transcript resolver running hybrid lexical + vector search.
///
/// Without an embedding provider, or when the embedding call itself fails,
/// ranking degrades to lexical-only rather than failing the source.
pub struct TranscriptResolver {
    index: Arc<dyn TranscriptIndex>,
    embeddings: Option<Arc<dyn EmbeddingProvider>>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    config: VectorConfig,
    weights: HybridWeights,
}

impl TranscriptResolver {
    pub fn new(
        index: Arc<dyn TranscriptIndex>,
        embeddings: Option<Arc<dyn EmbeddingProvider>>,
        cache: Arc<TieredCache>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        config: VectorConfig,
        weights: HybridWeights,
    ) -> Self {
        Self {
            index,
            embeddings,
            cache,
            breakers,
            retry,
            config,
            weights,
        }
    }

    /// Embed the query, reading through the tiered cache so repeated
    /// queries do not pay a live embeddings round trip
    async fn embed(&self, query: &str, force_refresh: bool) -> Option<Vec<f32>> {
        let provider = self.embeddings.as_ref()?.clone();
        let breaker = self.breakers.get("embeddings");
        let key = cache_key(EMBED_NAMESPACE, &[query]);
        let retry = self.retry.clone();
        let query = query.to_string();

        let result = self
            .cache
            .get(
                &key,
                || async move {
                    with_retry(&retry, || {
                        let breaker = breaker.clone();
                        let provider = provider.clone();
                        let query = query.clone();
                        async move {
                            breaker
                                .execute(|| async move { provider.embed(&query).await })
                                .await
                        }
                    })
                    .await
                },
                options(force_refresh),
            )
            .await;

        match result {
            Ok(outcome) => Some(outcome.data),
            Err(e) => {
                warn!(error = %e, "Embedding failed, degrading to lexical-only ranking");
                None
            }
        }
    }

    async fn search_hybrid(&self, query: &str, embedding: Option<Vec<f32>>) -> Result<Vec<TranscriptHit>> {
        let limit = self.config.limit;
        let breaker = self.breakers.get("transcript_index");

        let text_hits = with_retry(&self.retry, || {
            let breaker = breaker.clone();
            let index = self.index.clone();
            let query = query.to_string();
            async move {
                breaker
                    .execute(|| async move { index.text_search(&query, limit).await })
                    .await
            }
        })
        .await?;

        let Some(embedding) = embedding else {
            let mut hits = text_hits;
            sort_hits(&mut hits, self.weights);
            return Ok(hits);
        };

        let vector_hits = with_retry(&self.retry, || {
            let breaker = breaker.clone();
            let index = self.index.clone();
            let embedding = embedding.clone();
            async move {
                breaker
                    .execute(|| async move { index.vector_search(&embedding, limit).await })
                    .await
            }
        })
        .await?;

        let merged = merge_hybrid(text_hits, vector_hits, self.weights);
        Ok(apply_similarity_threshold(
            merged,
            self.config.similarity_threshold,
        ))
    }
}

#[async_trait]
impl SourceResolver for TranscriptResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::VectorIndex
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Vec<RetrievalContext>> {
        let embedding = self.embed(query, force_refresh).await;
        let mode = if embedding.is_some() { "hybrid" } else { "lexical" };
        let limit_s = self.config.limit.to_string();
        let key = cache_key(self.kind().namespace(), &[query, limit_s.as_str(), mode]);

        let outcome = self
            .cache
            .get(
                &key,
                || self.search_hybrid(query, embedding),
                options(force_refresh),
            )
            .await?;

        debug!(mode, hits = outcome.data.len(), "Transcript search resolved");
        let hits: Vec<TranscriptHit> = outcome.data;
        Ok(hits
            .into_iter()
            .map(|hit| {
                RetrievalContext::new(
                    SourceKind::VectorIndex,
                    ContextPayload::TitleSnippet {
                        title: hit.title,
                        snippet: hit.snippet,
                        url: None,
                    },
                )
                .with_scores(RelevanceScores {
                    text_rank: hit.text_rank,
                    vector_similarity: hit.vector_similarity,
                    combined: hit.combined,
                })
            })
            .collect())
    }
}

/// Hot-content resolver serving previously generated answers
pub struct HotCacheResolver {
    store: Arc<dyn HotContentStore>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    config: HotCacheConfig,
}

impl HotCacheResolver {
    pub fn new(
        store: Arc<dyn HotContentStore>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        config: HotCacheConfig,
    ) -> Self {
        Self {
            store,
            breakers,
            retry,
            config,
        }
    }
}

#[async_trait]
impl SourceResolver for HotCacheResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::HotCache
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn resolve(&self, query: &str, _force_refresh: bool) -> Result<Vec<RetrievalContext>> {
        // Already a cache lookup; no tiered read-through on top
        let breaker = self.breakers.get("hot_content");
        let entries = with_retry(&self.retry, || {
            let breaker = breaker.clone();
            let store = self.store.clone();
            let query = query.to_string();
            async move {
                breaker
                    .execute(|| async move { store.lookup(&query, 4).await })
                    .await
            }
        })
        .await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                RetrievalContext::new(
                    SourceKind::HotCache,
                    ContextPayload::QuestionAnswer {
                        question: entry.question,
                        answer: entry.answer,
                    },
                )
            })
            .collect())
    }
}

/// Live search-results resolver
pub struct LiveSearchResolver {
    provider: Arc<dyn LiveSearchProvider>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    config: LiveSearchConfig,
}

impl LiveSearchResolver {
    pub fn new(
        provider: Arc<dyn LiveSearchProvider>,
        cache: Arc<TieredCache>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        config: LiveSearchConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            breakers,
            retry,
            config,
        }
    }
}

#[async_trait]
impl SourceResolver for LiveSearchResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::LiveSearch
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Vec<RetrievalContext>> {
        let key = cache_key(self.kind().namespace(), &[query]);
        let breaker = self.breakers.get("live_search");
        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let query = query.to_string();

        let outcome = self
            .cache
            .get(
                &key,
                || async move {
                    with_retry(&retry, || {
                        let breaker = breaker.clone();
                        let provider = provider.clone();
                        let query = query.clone();
                        async move {
                            breaker
                                .execute(|| async move { provider.search(&query).await })
                                .await
                        }
                    })
                    .await
                },
                options(force_refresh),
            )
            .await?;

        let data: super::providers::SerpData = outcome.data;
        if data.top_results.is_empty()
            && data.related_questions.is_empty()
            && data.related_searches.is_empty()
        {
            return Ok(Vec::new());
        }

        Ok(vec![RetrievalContext::new(
            SourceKind::LiveSearch,
            ContextPayload::SerpFragment {
                top_results: data.top_results,
                related_questions: data.related_questions,
                related_searches: data.related_searches,
            },
        )])
    }
}

/// Content-enrichment resolver
pub struct EnrichmentResolver {
    provider: Arc<dyn EnrichmentProvider>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    config: EnrichmentConfig,
}

impl EnrichmentResolver {
    pub fn new(
        provider: Arc<dyn EnrichmentProvider>,
        cache: Arc<TieredCache>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryConfig,
        config: EnrichmentConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            breakers,
            retry,
            config,
        }
    }
}

#[async_trait]
impl SourceResolver for EnrichmentResolver {
    fn kind(&self) -> SourceKind {
        SourceKind::Enrichment
    }

    fn budget(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Vec<RetrievalContext>> {
        let key = cache_key(self.kind().namespace(), &[query]);
        let breaker = self.breakers.get("enrichment");
        let provider = self.provider.clone();
        let retry = self.retry.clone();
        let query = query.to_string();

        let outcome = self
            .cache
            .get(
                &key,
                || async move {
                    with_retry(&retry, || {
                        let breaker = breaker.clone();
                        let provider = provider.clone();
                        let query = query.clone();
                        async move {
                            breaker
                                .execute(|| async move { provider.enrich(&query).await })
                                .await
                        }
                    })
                    .await
                },
                options(force_refresh),
            )
            .await?;

        let docs: Vec<super::providers::EnrichmentDoc> = outcome.data;
        Ok(docs
            .into_iter()
            .map(|doc| {
                RetrievalContext::new(
                    SourceKind::Enrichment,
                    ContextPayload::TitleSnippet {
                        title: doc.title,
                        snippet: doc.snippet,
                        url: doc.url,
                    },
                )
            })
            .collect())
    }
}

/// Hot-content store backed by the persisted response envelopes the relay
/// writes after each completed stream
pub struct EnvelopeAnswerStore {
    cache: Arc<TieredCache>,
}

impl EnvelopeAnswerStore {
    pub fn new(cache: Arc<TieredCache>) -> Self {
        Self { cache }
    }
}

/// Normalize a question into the slug the relay persists answers under
pub fn slugify(query: &str) -> String {
    let mut slug = String::with_capacity(query.len());
    let mut last_dash = true;
    for ch in query.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Cache key for a persisted response envelope
pub fn envelope_key(slug: &str) -> String {
    format!("resp:{}", slug)
}

#[async_trait]
impl HotContentStore for EnvelopeAnswerStore {
    async fn lookup(&self, query: &str, _limit: usize) -> Result<Vec<HotEntry>> {
        let slug = slugify(query);
        if slug.is_empty() {
            return Ok(Vec::new());
        }

        let envelope: Option<ResponseEnvelope> = self.cache.peek(&envelope_key(&slug)).await?;
        let Some(envelope) = envelope else {
            return Ok(Vec::new());
        };
        if envelope.is_expired() {
            return Ok(Vec::new());
        }

        Ok(vec![HotEntry {
            slug: envelope.slug.clone(),
            question: query.to_string(),
            answer: envelope.plain_content(),
        }])
    }
}
