/// Metrics Module - Prometheus Instrumentation
///
/// Registers the named counters/gauges/histograms the ingestion engine
/// updates. Registration and gathering are in scope; the HTTP scrape
/// surface that exposes `gather_metrics()` output is not.

use prometheus::{
    Registry, IntCounter, IntCounterVec, IntGauge, Histogram, HistogramOpts, Opts, Encoder,
    TextEncoder,
};
use lazy_static::lazy_static;
use std::time::Instant;

/// Buckets for `explorer_backfill_duration_seconds`.
const BACKFILL_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

lazy_static! {
    /// Global Prometheus registry.
    pub static ref REGISTRY: Registry = Registry::new();

    pub static ref BLOCKS_INDEXED_TOTAL: IntCounter = IntCounter::new(
        "explorer_blocks_indexed_total",
        "Total blocks persisted by backfill or live-tail"
    ).unwrap();

    pub static ref INDEX_LAG_BLOCKS: IntGauge = IntGauge::new(
        "explorer_index_lag_blocks",
        "network_head - local_head, sampled after each live-tail append"
    ).unwrap();

    pub static ref INDEX_LAG_SECONDS: IntGauge = IntGauge::new(
        "explorer_index_lag_seconds",
        "now - fetched block timestamp, sampled after each live-tail append"
    ).unwrap();

    /// Labels: error_type in {network, rate_limit, invalid_param, timeout, other}.
    pub static ref RPC_ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("explorer_rpc_errors_total", "RPC errors by classified type"),
        &["error_type"]
    ).unwrap();

    pub static ref BACKFILL_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "explorer_backfill_duration_seconds",
            "Wall time to insert one collector batch during backfill"
        ).buckets(BACKFILL_DURATION_BUCKETS.to_vec())
    ).unwrap();

    pub static ref REORG_DETECTED_TOTAL: IntCounter = IntCounter::new(
        "explorer_reorg_detected_total",
        "Reorgs observed by the live-tail coordinator"
    ).unwrap();

    pub static ref REORG_DEPTH: IntGauge = IntGauge::new(
        "explorer_reorg_depth",
        "Depth of the most recently handled reorg"
    ).unwrap();

    pub static ref ORPHANED_BLOCKS_TOTAL: IntCounter = IntCounter::new(
        "explorer_orphaned_blocks_total",
        "Cumulative count of blocks flipped to orphaned=true"
    ).unwrap();

    pub static ref SENDER_RECOVERY_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "explorer_sender_recovery_failures_total",
        "Transactions whose from_addr fell back to the zero address"
    ).unwrap();

    pub static ref SERVICE_START_TIMESTAMP: IntGauge = IntGauge::new(
        "explorer_service_start_timestamp_seconds",
        "Unix timestamp at which this process initialized its metrics registry"
    ).unwrap();
}

/// Registers every metric with the global registry. Call once at startup.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(BLOCKS_INDEXED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INDEX_LAG_BLOCKS.clone()))?;
    REGISTRY.register(Box::new(INDEX_LAG_SECONDS.clone()))?;
    REGISTRY.register(Box::new(RPC_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BACKFILL_DURATION_SECONDS.clone()))?;
    REGISTRY.register(Box::new(REORG_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REORG_DEPTH.clone()))?;
    REGISTRY.register(Box::new(ORPHANED_BLOCKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SENDER_RECOVERY_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SERVICE_START_TIMESTAMP.clone()))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    SERVICE_START_TIMESTAMP.set(now as i64);

    Ok(())
}

/// Render the registry in Prometheus text exposition format.
///
/// The HTTP surface that serves this on METRICS_PORT/METRICS_ENDPOINT is an
/// external collaborator; this crate only produces the text.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Measures an elapsed duration for histogram observation.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

pub fn increment_blocks_indexed(count: u64) {
    BLOCKS_INDEXED_TOTAL.inc_by(count);
}

pub fn set_index_lag(lag_blocks: u64, lag_seconds: i64) {
    INDEX_LAG_BLOCKS.set(lag_blocks as i64);
    INDEX_LAG_SECONDS.set(lag_seconds);
}

/// `error_type` must be one of the RPC error taxonomy's label values; see
/// [`crate::rpc::RpcError::metric_label`].
pub fn increment_rpc_errors(error_type: &str) {
    RPC_ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

pub fn observe_backfill_batch_duration(duration_secs: f64) {
    BACKFILL_DURATION_SECONDS.observe(duration_secs);
}

/// Incremented as soon as a reorg is observed, before fork-point search —
/// every reorg counts here, including ones that later prove fatal.
pub fn increment_reorg_detected() {
    REORG_DETECTED_TOTAL.inc();
}

pub fn record_reorg_resolved(depth: u64, orphaned: u64) {
    REORG_DEPTH.set(depth as i64);
    ORPHANED_BLOCKS_TOTAL.inc_by(orphaned);
}

pub fn increment_sender_recovery_failures() {
    SENDER_RECOVERY_FAILURES_TOTAL.inc();
}
