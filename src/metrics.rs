//! Prometheus metrics (spec §10 ambient stack), modeled on
//! `services/gateway-rust/src/metrics.rs` and `adapters/src/metrics.rs`:
//! one process-wide `Registry` built once at startup, counters/histograms
//! for the gate, outbox, saga, and circuit-breaker as named in SPEC_FULL.md.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_gauge_vec_with_registry, CounterVec, Encoder, HistogramVec, IntGaugeVec, Opts,
    Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Idempotency gate decisions: label `outcome` in {miss, hit, conflict, processing}.
    pub static ref IDEMPOTENCY_DECISIONS: CounterVec = register_counter_vec_with_registry!(
        Opts::new("fluxpay_idempotency_decisions_total", "Idempotency gate acquire_lock outcomes"),
        &["outcome"],
        REGISTRY
    )
    .unwrap();

    /// Outbox publish attempts: label `result` in {published, retry, failed}.
    pub static ref OUTBOX_PUBLISH_TOTAL: CounterVec = register_counter_vec_with_registry!(
        Opts::new("fluxpay_outbox_publish_total", "Outbox publish attempts by result"),
        &["result"],
        REGISTRY
    )
    .unwrap();

    pub static ref OUTBOX_PUBLISH_LATENCY: HistogramVec = register_histogram_vec_with_registry!(
        "fluxpay_outbox_publish_latency_seconds",
        "Outbox publish cycle latency",
        &["stage"],
        REGISTRY
    )
    .unwrap();

    /// Saga step outcomes: labels `saga_type`, `step`, `outcome`.
    pub static ref SAGA_STEP_OUTCOMES: CounterVec = register_counter_vec_with_registry!(
        Opts::new("fluxpay_saga_step_outcomes_total", "Saga step execute/compensate outcomes"),
        &["saga_type", "step", "outcome"],
        REGISTRY
    )
    .unwrap();

    /// Circuit breaker state per remote endpoint: 0=closed, 1=half-open, 2=open.
    pub static ref CIRCUIT_BREAKER_STATE: IntGaugeVec = register_int_gauge_vec_with_registry!(
        Opts::new("fluxpay_circuit_breaker_state", "Current circuit breaker state (0=closed,1=half-open,2=open)"),
        &["endpoint"],
        REGISTRY
    )
    .unwrap();

    pub static ref PG_CALL_LATENCY: HistogramVec = register_histogram_vec_with_registry!(
        "fluxpay_pg_call_latency_seconds",
        "Payment gateway call latency by operation",
        &["operation"],
        REGISTRY
    )
    .unwrap();
}

/// Renders all registered metrics in Prometheus text exposition format, for
/// a `/metrics` scrape endpoint.
pub fn export() -> crate::error::Result<String> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| crate::error::AppError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| crate::error::AppError::Internal(e.to_string()))
}
