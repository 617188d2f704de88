//! End-to-end tests wiring the aggregator, cache, breakers, and relay
//! together with in-memory upstream fakes. No external services required.

use async_trait::async_trait;
use context_relay::{
    aggregator::{format_context, ContextAggregator},
    breaker::BreakerRegistry,
    cache::{tier::MemoryTier, TieredCache},
    config::{
        BreakerConfig, CacheConfig, FullTextConfig, HotCacheConfig, HybridWeights, RelayConfig,
        RetryConfig, VectorConfig,
    },
    error::{Result, RetrievalError, StreamError},
    relay::{sse_frames, CompletionClient, StreamEvent, StreamRelay, DONE_FRAME},
    retrieval::{
        resolver::{
            envelope_key, EnvelopeAnswerStore, FullTextResolver, HotCacheResolver, SourceResolver,
            TranscriptResolver,
        },
        EmbeddingProvider, QaHit, QaIndex, SourceKind, SourceToggles, TranscriptHit,
        TranscriptIndex,
    },
};
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn infra() -> (Arc<TieredCache>, Arc<BreakerRegistry>, RetryConfig) {
    (
        Arc::new(TieredCache::new(
            CacheConfig::default(),
            Arc::new(MemoryTier::new()),
        )),
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        RetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        },
    )
}

struct FakeQaIndex {
    calls: AtomicU32,
    delay: Duration,
}

#[async_trait]
impl QaIndex for FakeQaIndex {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<QaHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![QaHit {
            id: "qa-1".to_string(),
            question: query.to_string(),
            answer: "an indexed answer".to_string(),
            rank: 0.9,
        }])
    }
}

struct FakeTranscriptIndex;

#[async_trait]
impl TranscriptIndex for FakeTranscriptIndex {
    async fn text_search(&self, _query: &str, _limit: usize) -> Result<Vec<TranscriptHit>> {
        Ok(vec![TranscriptHit {
            id: "tr-1".to_string(),
            title: "All-hands interview".to_string(),
            snippet: "We iterate until it works.".to_string(),
            text_rank: Some(0.6),
            vector_similarity: None,
            combined: None,
        }])
    }

    async fn vector_search(&self, _embedding: &[f32], _limit: usize) -> Result<Vec<TranscriptHit>> {
        Ok(vec![TranscriptHit {
            id: "tr-1".to_string(),
            title: "All-hands interview".to_string(),
            snippet: "We iterate until it works.".to_string(),
            text_rank: None,
            vector_similarity: Some(0.8),
            combined: None,
        }])
    }
}

struct FakeEmbeddings;

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.5; 8])
    }
}

struct DownQaIndex;

#[async_trait]
impl QaIndex for DownQaIndex {
    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<QaHit>> {
        Err(RetrievalError::Upstream("connection refused".to_string()).into())
    }
}

fn full_text_resolver(
    index: Arc<dyn QaIndex>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryConfig,
    timeout_ms: u64,
) -> Arc<dyn SourceResolver> {
    Arc::new(FullTextResolver::new(
        index,
        cache,
        breakers,
        retry,
        FullTextConfig {
            url: None,
            timeout_ms,
            limit: 8,
        },
    ))
}

#[tokio::test]
async fn aggregation_is_partial_when_one_source_stalls() {
    let (cache, breakers, retry) = infra();

    let stalled = Arc::new(FakeQaIndex {
        calls: AtomicU32::new(0),
        delay: Duration::from_millis(500),
    });
    let resolvers: Vec<Arc<dyn SourceResolver>> = vec![
        // Budget far below the fake's delay: this source must be dropped
        full_text_resolver(stalled, cache.clone(), breakers.clone(), retry.clone(), 30),
        Arc::new(TranscriptResolver::new(
            Arc::new(FakeTranscriptIndex),
            Some(Arc::new(FakeEmbeddings)),
            cache.clone(),
            breakers.clone(),
            retry.clone(),
            VectorConfig::default(),
            HybridWeights::default(),
        )),
        Arc::new(HotCacheResolver::new(
            Arc::new(EnvelopeAnswerStore::new(cache.clone())),
            breakers,
            retry,
            HotCacheConfig::default(),
        )),
    ];

    let aggregator = ContextAggregator::new(resolvers);
    let result = aggregator
        .build_context("how do you build rockets", &SourceToggles::default(), false)
        .await
        .unwrap();

    // Only the transcript source produced anything: the full-text source
    // timed out and the hot cache has no prior answer
    assert_eq!(result.contexts.len(), 1);
    assert_eq!(result.contexts[0].source, SourceKind::VectorIndex);
    assert!((result.total_weight - 1.0).abs() < 1e-6);

    let formatted = format_context(&result);
    assert!(formatted.contains("In his own words"));
    assert!(formatted.contains("All-hands interview"));
}

#[tokio::test]
async fn repeated_queries_hit_the_cache_not_the_upstream() {
    let (cache, breakers, retry) = infra();
    let index = Arc::new(FakeQaIndex {
        calls: AtomicU32::new(0),
        delay: Duration::ZERO,
    });
    let aggregator = ContextAggregator::new(vec![full_text_resolver(
        index.clone(),
        cache,
        breakers,
        retry,
        500,
    )]);

    for _ in 0..5 {
        let result = aggregator
            .build_context("same question", &SourceToggles::default(), false)
            .await
            .unwrap();
        assert_eq!(result.contexts.len(), 1);
    }
    assert_eq!(index.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn repeated_failures_open_the_breaker() {
    let (cache, _, retry) = infra();
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
        failure_threshold: 3,
        ..Default::default()
    }));
    let aggregator = ContextAggregator::new(vec![full_text_resolver(
        Arc::new(DownQaIndex),
        cache,
        breakers.clone(),
        retry,
        500,
    )]);

    // Each aggregation retries twice against the dead upstream; after
    // enough failures the circuit opens and short-circuits
    for i in 0..4 {
        let result = aggregator
            .build_context(&format!("q{}", i), &SourceToggles::default(), true)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    assert_eq!(
        breakers.get("qa_index").state(),
        context_relay::breaker::CircuitState::Open
    );
}

struct ScriptedCompletion {
    deltas: Vec<&'static str>,
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    fn provider(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn stream_completion(
        &self,
        _system: &str,
        _user: &str,
    ) -> Result<context_relay::relay::upstream::DeltaStream> {
        let deltas: Vec<Result<String>> = self.deltas.iter().map(|d| Ok(d.to_string())).collect();
        Ok(futures::stream::iter(deltas).boxed())
    }
}

struct BrokenCompletion;

#[async_trait]
impl CompletionClient for BrokenCompletion {
    fn provider(&self) -> &str {
        "broken"
    }

    fn model(&self) -> &str {
        "broken"
    }

    async fn stream_completion(
        &self,
        _system: &str,
        _user: &str,
    ) -> Result<context_relay::relay::upstream::DeltaStream> {
        Err(StreamError::Unavailable("refused".to_string()).into())
    }
}

fn relay_with(
    completion: Option<Arc<dyn CompletionClient>>,
    cache: Arc<TieredCache>,
) -> StreamRelay {
    StreamRelay::new(
        completion,
        cache,
        Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        RelayConfig {
            fallback_pacing_ms: 1,
            fallback_chunk_words: 3,
            ..Default::default()
        },
        CacheConfig::default(),
    )
}

async fn frames_for(relay: &StreamRelay, query: &str) -> Vec<String> {
    let rx = relay.stream(
        query.to_string(),
        context_relay::retrieval::models::RagResult::empty(),
        String::new(),
    );
    sse_frames(rx).collect().await
}

#[tokio::test]
async fn live_and_fallback_streams_speak_the_same_protocol() {
    let (cache, _, _) = infra();
    let live = relay_with(
        Some(Arc::new(ScriptedCompletion {
            deltas: vec!["We ", "land ", "them."],
        })),
        cache.clone(),
    );
    let degraded = relay_with(Some(Arc::new(BrokenCompletion)), cache);

    for relay in [&live, &degraded] {
        let frames = frames_for(relay, "why land rockets").await;

        // Meta first, a done event and the sentinel last, only deltas
        // in between
        assert!(frames.first().unwrap().contains(r#""type":"meta""#));
        assert_eq!(frames.last().unwrap(), DONE_FRAME);
        assert!(frames[frames.len() - 2].contains(r#""type":"done""#));
        for frame in &frames[1..frames.len() - 2] {
            assert!(frame.contains(r#""type":"delta""#));
        }
    }
}

#[tokio::test]
async fn completed_answers_replay_from_cache_with_cached_flag() {
    let (cache, _, _) = infra();
    let relay = relay_with(
        Some(Arc::new(ScriptedCompletion {
            deltas: vec!["Reuse ", "is the key."],
        })),
        cache.clone(),
    );

    let first = frames_for(&relay, "why reuse boosters").await;
    assert!(first.first().unwrap().contains(r#""cached":false"#));

    // The answer was persisted under the query slug
    let stored: Option<context_relay::cache::ResponseEnvelope> = cache
        .peek(&envelope_key("why-reuse-boosters"))
        .await
        .unwrap();
    assert_eq!(stored.unwrap().plain_content(), "Reuse is the key.");

    let second = frames_for(&relay, "why reuse boosters").await;
    assert!(second.first().unwrap().contains(r#""cached":true"#));
    assert_eq!(second.last().unwrap(), DONE_FRAME);
    assert!(second[second.len() - 2].contains(r#""type":"done""#));

    let replayed: String = second[1..second.len() - 2]
        .iter()
        .map(|frame| {
            let json = frame.trim_start_matches("data: ").trim_end();
            let event: StreamEvent = serde_json::from_str(json).unwrap();
            match event {
                StreamEvent::Delta { delta } => delta,
                other => panic!("unexpected event {:?}", other),
            }
        })
        .collect();
    assert_eq!(replayed, "Reuse is the key.");
}

#[tokio::test]
async fn hot_cache_source_surfaces_previous_answers() {
    let (cache, breakers, retry) = infra();
    let relay = relay_with(
        Some(Arc::new(ScriptedCompletion {
            deltas: vec!["Full answer."],
        })),
        cache.clone(),
    );

    // Stream once so an envelope is persisted
    frames_for(&relay, "what about mars").await;

    let resolver = HotCacheResolver::new(
        Arc::new(EnvelopeAnswerStore::new(cache)),
        breakers,
        retry,
        HotCacheConfig::default(),
    );
    let contexts = resolver.resolve("what about mars", false).await.unwrap();

    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].source, SourceKind::HotCache);
    let preview = contexts[0].preview(200);
    assert!(preview.contains("Full answer."));
}
