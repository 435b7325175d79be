// src/observability/mod.rs
//! Tracing and metrics initialization
//!
//! Call [`init_tracing`] and [`init_metrics`] once at process start. Pool
//! occupancy gauges are published by the pool's maintenance task via
//! [`record_pool_stats`]; recording is a no-op until a recorder is
//! installed, so library users who bring their own exporter lose nothing.

use crate::runtime::pool::PoolStats;
use crate::utils::errors::{EngineError, Result};
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber (env-filtered, `info` default)
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| EngineError::Observability(e.to_string()))
}

/// Install the Prometheus metrics recorder and exporter
pub fn init_metrics() -> Result<()> {
    PrometheusBuilder::new()
        .install()
        .map_err(|e| EngineError::Observability(e.to_string()))?;

    describe_gauge!(
        "gantry_pool_idle_runtimes",
        "Idle runtimes available for checkout"
    );
    describe_gauge!(
        "gantry_pool_in_use_runtimes",
        "Runtimes currently serving a request"
    );
    describe_gauge!(
        "gantry_pool_broken_runtimes",
        "Broken runtimes awaiting destruction"
    );
    describe_gauge!(
        "gantry_pool_wait_queue_depth",
        "Acquires blocked waiting for a runtime"
    );

    Ok(())
}

/// Publish pool occupancy gauges
pub fn record_pool_stats(stats: &PoolStats) {
    gauge!("gantry_pool_idle_runtimes").set(stats.idle as f64);
    gauge!("gantry_pool_in_use_runtimes").set(stats.in_use as f64);
    gauge!("gantry_pool_broken_runtimes").set(stats.broken as f64);
    gauge!("gantry_pool_wait_queue_depth").set(stats.waiters as f64);
}
