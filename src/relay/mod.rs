//! Streaming answer relay
//!
//! One producer task per stream pushes events into a bounded channel; the
//! HTTP layer drains the channel into server-sent-events frames. Every
//! stream opens with a meta event and ends with exactly one terminal
//! event, done on completion or error on mid-flight failure, followed by
//! the `[DONE]` sentinel frame. The same protocol is spoken on all three
//! routes: live completion, cached replay, and synthesized fallback, so
//! clients cannot tell a degraded stream from a healthy one structurally.

pub mod events;
pub mod fallback;
pub mod upstream;

pub use events::{SourceSummary, StreamEvent, DONE_FRAME};
pub use upstream::{CompletionClient, HttpCompletionClient};

use crate::breaker::BreakerRegistry;
use crate::cache::{CacheOptions, ResponseEnvelope, TieredCache};
use crate::config::{CacheConfig, RelayConfig};
use crate::observability::MetricsCollector;
use crate::retrieval::models::RagResult;
use crate::retrieval::resolver::{envelope_key, slugify};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Model name reported when streaming synthesized fallback text
const FALLBACK_MODEL: &str = "fallback";

/// Provider names reported for the non-live routes
const FALLBACK_PROVIDER: &str = "fallback";
const CACHE_PROVIDER: &str = "cache";

#[derive(Clone)]
pub struct StreamRelay {
    completion: Option<Arc<dyn CompletionClient>>,
    cache: Arc<TieredCache>,
    breakers: Arc<BreakerRegistry>,
    relay_config: RelayConfig,
    cache_config: CacheConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl StreamRelay {
    pub fn new(
        completion: Option<Arc<dyn CompletionClient>>,
        cache: Arc<TieredCache>,
        breakers: Arc<BreakerRegistry>,
        relay_config: RelayConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            completion,
            cache,
            breakers,
            relay_config,
            cache_config,
            metrics: None,
        }
    }

    /// Attach a metrics collector counting cached and fallback streams
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start a stream for one query. The producer runs until the stream
    /// completes or the returned receiver is dropped.
    pub fn stream(&self, query: String, rag: RagResult, context: String) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(self.relay_config.channel_capacity.max(1));
        let relay = self.clone();
        tokio::spawn(async move {
            relay.produce(query, rag, context, tx).await;
        });
        rx
    }

    async fn produce(
        &self,
        query: String,
        rag: RagResult,
        context: String,
        tx: mpsc::Sender<StreamEvent>,
    ) {
        let slug = slugify(&query);
        let conversation_id = Uuid::new_v4().to_string();
        let context_chars = context.chars().count();

        // Cached replay first: a previously generated answer streams back
        // without touching the completion upstream
        if !slug.is_empty() {
            if let Some(envelope) = self.cached_answer(&slug).await {
                info!(slug, conversation_id, "Replaying cached answer");
                if let Some(metrics) = &self.metrics {
                    metrics.record_cached_stream();
                }
                let meta = StreamEvent::meta(
                    CACHE_PROVIDER,
                    &envelope.model,
                    conversation_id,
                    true,
                    &rag,
                    context_chars,
                );
                if tx.send(meta).await.is_err() {
                    return;
                }
                if fallback::synthesize(&tx, &envelope.plain_content(), &self.relay_config).await {
                    let _ = tx.send(StreamEvent::done("stop")).await;
                }
                return;
            }
        }

        match &self.completion {
            Some(client) => {
                let meta = StreamEvent::meta(
                    client.provider(),
                    client.model(),
                    conversation_id,
                    false,
                    &rag,
                    context_chars,
                );
                if tx.send(meta).await.is_err() {
                    return;
                }
                self.stream_live(client.clone(), &slug, &query, &context, &tx)
                    .await;
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback_stream();
                }
                let meta = StreamEvent::meta(
                    FALLBACK_PROVIDER,
                    FALLBACK_MODEL,
                    conversation_id,
                    false,
                    &rag,
                    context_chars,
                );
                if tx.send(meta).await.is_err() {
                    return;
                }
                if fallback::synthesize(&tx, &self.relay_config.fallback_text, &self.relay_config)
                    .await
                {
                    let _ = tx.send(StreamEvent::done("stop")).await;
                }
            }
        }
    }

    async fn cached_answer(&self, slug: &str) -> Option<ResponseEnvelope> {
        match self.cache.peek::<ResponseEnvelope>(&envelope_key(slug)).await {
            Ok(Some(envelope)) if !envelope.is_expired() => Some(envelope),
            Ok(_) => None,
            Err(e) => {
                warn!(slug, error = %e, "Cached answer lookup failed");
                None
            }
        }
    }

    async fn stream_live(
        &self,
        client: Arc<dyn CompletionClient>,
        slug: &str,
        query: &str,
        context: &str,
        tx: &mpsc::Sender<StreamEvent>,
    ) {
        let breaker = self.breakers.get("completion");
        let opened = breaker
            .execute(|| client.stream_completion(context, query))
            .await;

        let mut deltas = match opened {
            Ok(deltas) => deltas,
            Err(e) => {
                warn!(error = %e, "Completion upstream unreachable, synthesizing fallback");
                if let Some(metrics) = &self.metrics {
                    metrics.record_fallback_stream();
                }
                if fallback::synthesize(tx, &self.relay_config.fallback_text, &self.relay_config)
                    .await
                {
                    let _ = tx.send(StreamEvent::done("stop")).await;
                }
                return;
            }
        };

        let mut answer = String::new();
        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => {
                    answer.push_str(&text);
                    if tx.send(StreamEvent::delta(text)).await.is_err() {
                        // Consumer went away; abandon without persisting
                        debug!("Stream cancelled by consumer");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Completion stream failed mid-flight");
                    let _ = tx
                        .send(StreamEvent::error(events::codes::STREAM_TRANSPORT, e.to_string()))
                        .await;
                    return;
                }
            }
        }

        let _ = tx.send(StreamEvent::done("stop")).await;

        if !slug.is_empty() && !answer.is_empty() {
            self.persist_answer(slug, client.model(), answer).await;
        }
    }

    async fn persist_answer(&self, slug: &str, model: &str, answer: String) {
        let envelope = ResponseEnvelope::new(
            "answer",
            slug,
            model,
            answer,
            self.cache_config.response_ttl_secs,
            self.cache_config.compression_threshold_bytes,
        );
        let opts = CacheOptions {
            l2_ttl: Some(Duration::from_secs(
                self.cache_config.response_ttl_secs.max(0) as u64,
            )),
            ..Default::default()
        };
        if let Err(e) = self.cache.set(&envelope_key(slug), &envelope, opts).await {
            warn!(slug, error = %e, "Failed to persist completed answer");
        } else {
            info!(slug, "Persisted completed answer");
        }
    }
}

/// Drain relay events into SSE frames. The `[DONE]` sentinel closes every
/// stream, after the done event or after a terminal error.
pub fn sse_frames(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = String> + Send {
    futures::stream::unfold((rx, false), |(mut rx, finished)| async move {
        if finished {
            return None;
        }
        match rx.recv().await {
            Some(event) => Some((event.to_sse_frame(), (rx, false))),
            None => Some((DONE_FRAME.to_string(), (rx, true))),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::MemoryTier;
    use crate::config::BreakerConfig;
    use crate::error::{Result, StreamError};
    use crate::retrieval::models::{ContextPayload, RetrievalContext, SourceKind};
    use async_trait::async_trait;
    use super::upstream::DeltaStream;

    struct FakeCompletion {
        deltas: Vec<Result<String>>,
        connect_error: bool,
    }

    impl FakeCompletion {
        fn ok(texts: &[&str]) -> Arc<dyn CompletionClient> {
            Arc::new(Self {
                deltas: texts.iter().map(|t| Ok(t.to_string())).collect(),
                connect_error: false,
            })
        }

        fn unreachable() -> Arc<dyn CompletionClient> {
            Arc::new(Self {
                deltas: Vec::new(),
                connect_error: true,
            })
        }

        fn failing_mid_stream() -> Arc<dyn CompletionClient> {
            Arc::new(Self {
                deltas: vec![
                    Ok("partial".to_string()),
                    Err(StreamError::Transport("reset".to_string()).into()),
                ],
                connect_error: false,
            })
        }
    }

    #[async_trait]
    impl CompletionClient for FakeCompletion {
        fn provider(&self) -> &str {
            "fake"
        }

        fn model(&self) -> &str {
            "fake-model"
        }

        async fn stream_completion(&self, _system: &str, _user: &str) -> Result<DeltaStream> {
            if self.connect_error {
                return Err(StreamError::Unavailable("refused".to_string()).into());
            }
            let deltas: Vec<Result<String>> = self
                .deltas
                .iter()
                .map(|d| match d {
                    Ok(t) => Ok(t.clone()),
                    Err(_) => Err(StreamError::Transport("reset".to_string()).into()),
                })
                .collect();
            Ok(futures::stream::iter(deltas).boxed())
        }
    }

    fn test_relay(completion: Option<Arc<dyn CompletionClient>>) -> (StreamRelay, Arc<TieredCache>) {
        let cache = Arc::new(TieredCache::new(
            CacheConfig::default(),
            Arc::new(MemoryTier::new()),
        ));
        let relay = StreamRelay::new(
            completion,
            cache.clone(),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            RelayConfig {
                fallback_pacing_ms: 1,
                fallback_chunk_words: 2,
                ..Default::default()
            },
            CacheConfig::default(),
        );
        (relay, cache)
    }

    fn sample_rag() -> RagResult {
        RagResult::from_contexts(vec![RetrievalContext::new(
            SourceKind::TextIndex,
            ContextPayload::QuestionAnswer {
                question: "q".to_string(),
                answer: "a".to_string(),
            },
        )])
    }

    async fn collect_events(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn collect_text(events: &[StreamEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Delta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_live_stream_protocol() {
        let (relay, _) = test_relay(Some(FakeCompletion::ok(&["Mars ", "is ", "next."])));
        let rx = relay.stream("why mars".to_string(), sample_rag(), "ctx".to_string());
        let events = collect_events(rx).await;

        let StreamEvent::Meta {
            provider,
            model,
            cached,
            ..
        } = &events[0]
        else {
            panic!("expected meta first");
        };
        assert_eq!(provider, "fake");
        assert_eq!(model, "fake-model");
        assert!(!*cached);

        assert_eq!(collect_text(&events), "Mars is next.");
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Done { finish_reason }) if finish_reason == "stop"
        ));
    }

    #[tokio::test]
    async fn test_completed_answer_is_persisted_and_replayed() {
        let (relay, cache) = test_relay(Some(FakeCompletion::ok(&["answer text"])));

        let rx = relay.stream("why mars".to_string(), sample_rag(), "ctx".to_string());
        collect_events(rx).await;

        let stored: Option<ResponseEnvelope> =
            cache.peek(&envelope_key("why-mars")).await.unwrap();
        assert_eq!(stored.unwrap().plain_content(), "answer text");

        // Second stream replays from cache without the upstream
        let rx = relay.stream("why mars".to_string(), sample_rag(), "ctx".to_string());
        let events = collect_events(rx).await;
        let StreamEvent::Meta {
            provider, cached, ..
        } = &events[0]
        else {
            panic!("expected meta first");
        };
        assert_eq!(provider, CACHE_PROVIDER);
        assert!(*cached);
        assert_eq!(collect_text(&events), "answer text");
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_unconfigured_upstream_streams_fallback() {
        let (relay, _) = test_relay(None);
        let rx = relay.stream("anything".to_string(), RagResult::empty(), String::new());
        let events = collect_events(rx).await;

        let StreamEvent::Meta { model, cached, .. } = &events[0] else {
            panic!("expected meta first");
        };
        assert_eq!(model, FALLBACK_MODEL);
        assert!(!*cached);

        assert_eq!(collect_text(&events), RelayConfig::default().fallback_text);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_upstream_degrades_to_fallback() {
        let (relay, cache) = test_relay(Some(FakeCompletion::unreachable()));
        let rx = relay.stream("q".to_string(), RagResult::empty(), String::new());
        let events = collect_events(rx).await;

        // Meta still reports the live model; the deltas are fallback text
        assert!(matches!(events[0], StreamEvent::Meta { cached: false, .. }));
        assert_eq!(collect_text(&events), RelayConfig::default().fallback_text);
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));

        // Nothing was persisted
        let stored: Option<ResponseEnvelope> = cache.peek(&envelope_key("q")).await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_mid_stream_failure_is_terminal_error() {
        let (relay, cache) = test_relay(Some(FakeCompletion::failing_mid_stream()));
        let rx = relay.stream("q".to_string(), RagResult::empty(), String::new());
        let events = collect_events(rx).await;

        let last = events.last().unwrap();
        assert!(
            matches!(last, StreamEvent::Error { error } if error.code == events::codes::STREAM_TRANSPORT)
        );

        // Partial answers are never persisted
        let stored: Option<ResponseEnvelope> = cache.peek(&envelope_key("q")).await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_without_persisting() {
        let (relay, cache) = test_relay(None);
        let rx = relay.stream("long one".to_string(), RagResult::empty(), String::new());
        drop(rx);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let stored: Option<ResponseEnvelope> =
            cache.peek(&envelope_key("long-one")).await.unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn test_stream_route_counters() {
        let metrics = Arc::new(MetricsCollector::new());
        let (relay, _) = test_relay(None);
        let relay = relay.with_metrics(metrics.clone());

        let rx = relay.stream("q".to_string(), RagResult::empty(), String::new());
        collect_events(rx).await;

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.streams_fallback, 1);
        assert_eq!(snapshot.streams_cached, 0);
    }

    #[tokio::test]
    async fn test_sse_frames_end_with_done_event_then_sentinel() {
        let (relay, _) = test_relay(Some(FakeCompletion::ok(&["hi"])));
        let rx = relay.stream("q".to_string(), RagResult::empty(), String::new());
        let frames: Vec<String> = sse_frames(rx).collect().await;

        assert!(frames.first().unwrap().contains(r#""type":"meta""#));
        assert_eq!(frames.last().unwrap(), DONE_FRAME);
        assert!(frames[frames.len() - 2].contains(r#""type":"done""#));
    }

    #[tokio::test]
    async fn test_sse_frames_close_errored_stream_with_sentinel() {
        let (relay, _) = test_relay(Some(FakeCompletion::failing_mid_stream()));
        let rx = relay.stream("q".to_string(), RagResult::empty(), String::new());
        let frames: Vec<String> = sse_frames(rx).collect().await;

        assert_eq!(frames.last().unwrap(), DONE_FRAME);
        assert!(frames[frames.len() - 2].contains(r#""type":"error""#));
        assert!(!frames.iter().any(|f| f.contains(r#""type":"done""#)));
    }
}
