//! Logging and metrics setup for the gateway process

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use scholarlink_common::config::ObservabilityConfig;
use scholarlink_common::metrics::{
    self, EMBEDDING_BUCKETS, GENERATION_BUCKETS, LATENCY_BUCKETS, METRICS_PREFIX,
};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when it is set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Start the Prometheus scrape endpoint and describe every metric.
/// A zero port only registers descriptions.
pub fn init_metrics(config: &ObservabilityConfig) -> anyhow::Result<()> {
    if config.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));

        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_request_duration_seconds", METRICS_PREFIX)),
                LATENCY_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_embedding_duration_seconds", METRICS_PREFIX)),
                EMBEDDING_BUCKETS,
            )?
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_generation_duration_seconds", METRICS_PREFIX)),
                GENERATION_BUCKETS,
            )?
            .install()
            .context("failed to install Prometheus exporter")?;

        tracing::info!(%addr, "Prometheus exporter listening");
    }

    metrics::register_metrics();
    Ok(())
}
