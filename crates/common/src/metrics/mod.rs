//! Metrics and observability utilities
//!
//! Prometheus-style metrics for the ingestion and recommendation pipeline
//! with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all ScholarLink metrics
pub const METRICS_PREFIX: &str = "scholarlink";

/// Buckets for HTTP trigger latency (in seconds); triggers only enqueue work
pub const LATENCY_BUCKETS: &[f64] = &[
    0.001,  // 1ms
    0.005,  // 5ms
    0.010,  // 10ms
    0.025,  // 25ms
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
];

/// Buckets for embedding latency
pub const EMBEDDING_BUCKETS: &[f64] = &[
    0.050,  // 50ms
    0.100,  // 100ms
    0.250,  // 250ms
    0.500,  // 500ms
    1.000,  // 1s
    2.000,  // 2s
    5.000,  // 5s
    10.00,  // 10s
    30.00,  // 30s
];

/// Buckets for long-form generation latency
pub const GENERATION_BUCKETS: &[f64] = &[
    1.0,
    2.5,
    5.0,
    10.0,
    20.0,
    40.0,
    60.0,
    120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider calls"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding provider latency in seconds"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding provider failures"
    );

    describe_counter!(
        format!("{}_embeddings_stored_total", METRICS_PREFIX),
        Unit::Count,
        "Embedding rows written to the store"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_papers_total", METRICS_PREFIX),
        Unit::Count,
        "Papers seen by ingestion, by outcome (fetched, saved, skipped, failed)"
    );

    // Recommendation metrics
    describe_counter!(
        format!("{}_recommendations_total", METRICS_PREFIX),
        Unit::Count,
        "Recommendation generations, by outcome"
    );

    describe_histogram!(
        format!("{}_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Content generation latency in seconds"
    );

    // Runs
    describe_counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Pipeline runs by kind and outcome"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Helper to record embedding metrics
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    } else {
        counter!(
            format!("{}_embedding_errors_total", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .increment(batch_size as u64);
    }
}

pub fn record_embedding_stored(owner_kind: &str) {
    counter!(
        format!("{}_embeddings_stored_total", METRICS_PREFIX),
        "owner_kind" => owner_kind.to_string()
    )
    .increment(1);
}

/// Helper to record ingestion outcomes; `outcome` is fetched, saved, skipped or failed
pub fn record_papers(outcome: &'static str, count: usize) {
    counter!(
        format!("{}_papers_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(count as u64);
}

/// Helper to record one generation attempt
pub fn record_generation(duration_secs: f64, success: bool) {
    let outcome = if success { "generated" } else { "failed" };

    counter!(
        format!("{}_recommendations_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(format!("{}_generation_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

pub fn record_run(kind: &str, outcome: &'static str) {
    counter!(
        format!("{}_runs_total", METRICS_PREFIX),
        "kind" => kind.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
