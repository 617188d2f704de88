//! HTTP surface: context assembly, the streaming endpoint, health checks,
//! metrics, and admin operations

use crate::aggregator::{format_context, ContextAggregator};
use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::cache::TieredCache;
use crate::observability::{HealthChecker, MetricsCollector};
use crate::relay::{sse_frames, StreamRelay};
use crate::retrieval::models::{RagResult, SourceToggles};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Server state
#[derive(Clone)]
pub struct ServerState {
    pub aggregator: Arc<ContextAggregator>,
    pub relay: StreamRelay,
    pub cache: Arc<TieredCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub health_checker: Arc<HealthChecker>,
    pub metrics_collector: Arc<MetricsCollector>,
}

/// Create HTTP server router
pub fn create_router(state: ServerState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/liveness", get(liveness_check))
        .route("/health/readiness", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/context", post(build_context))
        .route("/stream", get(stream_answer))
        .route("/admin/invalidate", post(invalidate))
        .route("/admin/breakers", get(breaker_stats))
        .route("/admin/breakers/reset", post(reset_breakers))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Full health check endpoint
async fn health_check(
    State(state): State<ServerState>,
) -> Result<Json<crate::observability::SystemHealth>, AppError> {
    let health = state.health_checker.check_health().await;
    Ok(Json(health))
}

/// Liveness check endpoint
async fn liveness_check(State(state): State<ServerState>) -> Result<StatusCode, AppError> {
    if state.health_checker.liveness() {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<ServerState>) -> Result<StatusCode, AppError> {
    if state.health_checker.readiness().await {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::SERVICE_UNAVAILABLE)
    }
}

/// Metrics endpoint (Prometheus format)
async fn metrics(State(state): State<ServerState>) -> Result<String, AppError> {
    let cache_stats = state.cache.stats().await;
    let open_circuits = state
        .breakers
        .get_stats()
        .values()
        .filter(|s| s.state == crate::breaker::CircuitState::Open)
        .count();
    Ok(state
        .metrics_collector
        .export_prometheus(&cache_stats, open_circuits))
}

#[derive(Debug, Deserialize)]
pub struct ContextRequest {
    pub query: String,
    #[serde(default)]
    pub sources: SourceToggles,
    #[serde(default)]
    pub force_refresh: bool,
}

#[derive(Debug, Serialize)]
pub struct ContextResponse {
    pub result: RagResult,
    /// Prompt-ready rendering of the contexts
    pub formatted: String,
}

/// Assemble grounding context for a query without streaming an answer
async fn build_context(
    State(state): State<ServerState>,
    Json(request): Json<ContextRequest>,
) -> Result<Json<ContextResponse>, AppError> {
    let query = request.query.trim();
    if query.is_empty() {
        return Err(AppError::bad_request("query must not be empty"));
    }

    let start = Instant::now();
    let result = state
        .aggregator
        .build_context(query, &request.sources, request.force_refresh)
        .await
        .map_err(|e| {
            state.metrics_collector.record_error();
            AppError::from(anyhow::Error::from(e))
        })?;

    state.metrics_collector.record_request(start.elapsed());
    state
        .metrics_collector
        .record_aggregation_latency(start.elapsed());

    let formatted = format_context(&result);
    Ok(Json(ContextResponse { result, formatted }))
}

/// Decrements the active-stream gauge when the response body is dropped,
/// whether the stream completed or the client disconnected
struct StreamGuard {
    metrics: Arc<MetricsCollector>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.metrics.decrement_streams();
    }
}

/// Stream an answer for a query as server-sent events
async fn stream_answer(
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let query = params
        .get("q")
        .map(|q| q.trim().to_string())
        .unwrap_or_default();
    if query.is_empty() {
        return Err(AppError::bad_request("missing query parameter 'q'"));
    }
    let force_refresh = params
        .get("refresh")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let stream_id = uuid::Uuid::new_v4();
    info!(%stream_id, query = %query, force_refresh, "Opening answer stream");

    let start = Instant::now();
    let rag = state
        .aggregator
        .build_context(&query, &SourceToggles::default(), force_refresh)
        .await
        .map_err(|e| {
            state.metrics_collector.record_error();
            AppError::from(anyhow::Error::from(e))
        })?;
    state
        .metrics_collector
        .record_aggregation_latency(start.elapsed());
    state.metrics_collector.record_request(start.elapsed());

    let context = format_context(&rag);
    let rx = state.relay.stream(query, rag, context);

    state.metrics_collector.increment_streams();
    let guard = StreamGuard {
        metrics: state.metrics_collector.clone(),
    };
    let body = sse_frames(rx).map(move |frame| {
        let _ = &guard;
        Ok::<_, std::convert::Infallible>(bytes::Bytes::from(frame))
    });

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .map_err(anyhow::Error::from)?;
    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidateResponse {
    pub invalidated: usize,
}

/// Drop cache entries matching a glob-like pattern from both tiers
async fn invalidate(
    State(state): State<ServerState>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, AppError> {
    if request.pattern.trim().is_empty() {
        return Err(AppError::bad_request("pattern must not be empty"));
    }

    let invalidated = state
        .cache
        .invalidate_pattern(&request.pattern)
        .await
        .map_err(|e| AppError::from(anyhow::Error::from(e)))?;
    info!(pattern = %request.pattern, invalidated, "Cache invalidation requested");
    Ok(Json(InvalidateResponse { invalidated }))
}

/// Current state of every circuit breaker
async fn breaker_stats(
    State(state): State<ServerState>,
) -> Result<Json<HashMap<String, BreakerSnapshot>>, AppError> {
    Ok(Json(state.breakers.get_stats()))
}

/// Force all circuit breakers closed
async fn reset_breakers(State(state): State<ServerState>) -> Result<StatusCode, AppError> {
    state.breakers.reset_all();
    info!("All circuit breakers reset");
    Ok(StatusCode::NO_CONTENT)
}

/// Start HTTP server
pub async fn start_server(
    addr: &str,
    state: ServerState,
    max_body_bytes: usize,
    shutdown: crate::shutdown::ShutdownNotifier,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(state, max_body_bytes);

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    Ok(())
}

/// Application error wrapper
pub struct AppError {
    status: StatusCode,
    source: anyhow::Error,
}

impl AppError {
    fn bad_request(message: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            source: anyhow::anyhow!("{}", message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, format!("{}", self.source)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            source: err.into(),
        }
    }
}
