//! Metrics collection and reporting

use crate::cache::CacheStats;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// System metrics
#[derive(Debug, Clone)]
pub struct SystemMetrics {
    /// Total requests processed
    pub total_requests: u64,

    /// Total errors
    pub total_errors: u64,

    /// Streams currently being produced
    pub active_streams: usize,

    /// Streams served from the response cache
    pub streams_cached: u64,

    /// Streams served as synthesized fallback
    pub streams_fallback: u64,

    /// Average response time (ms)
    pub avg_response_time_ms: f64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        let bucket_counters = buckets
            .iter()
            .map(|&b| (b, Arc::new(AtomicU64::new(0))))
            .collect();

        Self {
            buckets: bucket_counters,
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative buckets
        for (bucket, counter) in &self.buckets {
            if value <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            let count = counter.load(Ordering::Relaxed);
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bucket, count));
        }

        let total_count = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total_count));

        let sum = self.sum.load(Ordering::Relaxed) as f64;
        output.push_str(&format!("{}_sum {:.3}\n", name, sum));
        output.push_str(&format!("{}_count {}\n", name, total_count));

        output
    }
}

/// Metrics collector
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: Arc<AtomicU64>,
    total_errors: Arc<AtomicU64>,
    active_streams: Arc<AtomicUsize>,
    total_response_time_ms: Arc<AtomicU64>,
    streams_cached: Arc<AtomicU64>,
    streams_fallback: Arc<AtomicU64>,

    request_latency: Histogram,
    aggregation_latency: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: Arc::new(AtomicU64::new(0)),
            total_errors: Arc::new(AtomicU64::new(0)),
            active_streams: Arc::new(AtomicUsize::new(0)),
            total_response_time_ms: Arc::new(AtomicU64::new(0)),
            streams_cached: Arc::new(AtomicU64::new(0)),
            streams_fallback: Arc::new(AtomicU64::new(0)),
            request_latency: Histogram::new(LATENCY_BUCKETS),
            aggregation_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a request
    pub fn record_request(&self, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let ms = response_time.as_millis() as u64;
        self.total_response_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.request_latency.observe(ms as f64);
    }

    /// Record context aggregation latency
    pub fn record_aggregation_latency(&self, duration: Duration) {
        self.aggregation_latency.observe(duration.as_millis() as f64);
    }

    /// Record an error
    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment active streams
    pub fn increment_streams(&self) {
        self.active_streams.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement active streams
    pub fn decrement_streams(&self) {
        self.active_streams.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a stream served from the response cache
    pub fn record_cached_stream(&self) {
        self.streams_cached.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stream served as synthesized fallback
    pub fn record_fallback_stream(&self) {
        self.streams_fallback.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> SystemMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time_ms.load(Ordering::Relaxed);

        let avg_response_time_ms = if total_requests > 0 {
            total_response_time as f64 / total_requests as f64
        } else {
            0.0
        };

        SystemMetrics {
            total_requests,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            active_streams: self.active_streams.load(Ordering::Relaxed),
            streams_cached: self.streams_cached.load(Ordering::Relaxed),
            streams_fallback: self.streams_fallback.load(Ordering::Relaxed),
            avg_response_time_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self, cache: &CacheStats, open_circuits: usize) -> String {
        let metrics = self.get_metrics();
        let reads = cache.l1_hits + cache.l2_hits + cache.loader_loads;
        let cache_hit_rate = if reads > 0 {
            (cache.l1_hits + cache.l2_hits) as f64 / reads as f64
        } else {
            0.0
        };

        let mut output = format!(
            "# HELP context_relay_requests_total Total number of requests\n\
             # TYPE context_relay_requests_total counter\n\
             context_relay_requests_total {}\n\
             \n\
             # HELP context_relay_errors_total Total number of errors\n\
             # TYPE context_relay_errors_total counter\n\
             context_relay_errors_total {}\n\
             \n\
             # HELP context_relay_active_streams Streams currently being produced\n\
             # TYPE context_relay_active_streams gauge\n\
             context_relay_active_streams {}\n\
             \n\
             # HELP context_relay_streams_cached_total Streams replayed from the response cache\n\
             # TYPE context_relay_streams_cached_total counter\n\
             context_relay_streams_cached_total {}\n\
             \n\
             # HELP context_relay_streams_fallback_total Streams served as synthesized fallback\n\
             # TYPE context_relay_streams_fallback_total counter\n\
             context_relay_streams_fallback_total {}\n\
             \n\
             # HELP context_relay_cache_hit_rate Tiered cache hit rate\n\
             # TYPE context_relay_cache_hit_rate gauge\n\
             context_relay_cache_hit_rate {:.4}\n\
             \n\
             # HELP context_relay_cache_l1_entries Tier-1 cache entries\n\
             # TYPE context_relay_cache_l1_entries gauge\n\
             context_relay_cache_l1_entries {}\n\
             \n\
             # HELP context_relay_open_circuits Circuit breakers currently open\n\
             # TYPE context_relay_open_circuits gauge\n\
             context_relay_open_circuits {}\n\
             \n\
             # HELP context_relay_avg_response_time_ms Average response time in milliseconds\n\
             # TYPE context_relay_avg_response_time_ms gauge\n\
             context_relay_avg_response_time_ms {:.2}\n\
             \n\
             # HELP context_relay_uptime_seconds Uptime in seconds\n\
             # TYPE context_relay_uptime_seconds counter\n\
             context_relay_uptime_seconds {}\n\
             \n",
            metrics.total_requests,
            metrics.total_errors,
            metrics.active_streams,
            metrics.streams_cached,
            metrics.streams_fallback,
            cache_hit_rate,
            cache.l1_entries,
            open_circuits,
            metrics.avg_response_time_ms,
            metrics.uptime_secs,
        );

        output.push_str(&self.request_latency.export_prometheus(
            "context_relay_request_duration_ms",
            "Request duration in milliseconds",
        ));
        output.push('\n');

        output.push_str(&self.aggregation_latency.export_prometheus(
            "context_relay_aggregation_duration_ms",
            "Context aggregation duration in milliseconds",
        ));

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
