//! Prometheus metrics collection for natterd.
//!
//! Exposed on a separate HTTP port (see [`crate::http`]).
//!
//! - `natter_token_operations_total{backend,op,outcome}` - token store calls
//! - `natter_capability_operations_total{op,outcome}` - capability mints and checks
//! - `natter_authz_decisions_total{outcome}` - evaluator results
//! - `natter_introspection_duration_seconds` - OAuth2 introspection latency
//! - `natter_http_requests_total{method,status}` / `natter_http_request_duration_seconds{method}`

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Credentials
// ========================================================================

/// Token store operations by backend, operation and outcome.
pub static TOKEN_OPS: OnceLock<IntCounterVec> = OnceLock::new();

/// Capability mints and verifications.
pub static CAPABILITY_OPS: OnceLock<IntCounterVec> = OnceLock::new();

/// Authorization decisions by outcome (`authorized` or a rejection label).
pub static AUTHZ_DECISIONS: OnceLock<IntCounterVec> = OnceLock::new();

/// Round-trip time of introspection calls, including permit waits.
pub static INTROSPECTION_LATENCY: OnceLock<Histogram> = OnceLock::new();

// ========================================================================
// HTTP API
// ========================================================================

pub static HTTP_REQUESTS: OnceLock<IntCounterVec> = OnceLock::new();

pub static HTTP_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
/// Recording before `init` is a no-op.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(
                    error = %e,
                    concat!("Failed to register metric ", stringify!($metric))
                );
            }
            let _ = $metric.set(m);
        };
    }

    register!(
        TOKEN_OPS,
        IntCounterVec::new(
            Opts::new("natter_token_operations_total", "Token store operations"),
            &["backend", "op", "outcome"]
        )
    );
    register!(
        CAPABILITY_OPS,
        IntCounterVec::new(
            Opts::new(
                "natter_capability_operations_total",
                "Capability mints and verifications"
            ),
            &["op", "outcome"]
        )
    );
    register!(
        AUTHZ_DECISIONS,
        IntCounterVec::new(
            Opts::new("natter_authz_decisions_total", "Authorization decisions by outcome"),
            &["outcome"]
        )
    );
    register!(INTROSPECTION_LATENCY, Histogram::with_opts(
        HistogramOpts::new(
            "natter_introspection_duration_seconds",
            "OAuth2 token introspection latency"
        )
        .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])));

    register!(
        HTTP_REQUESTS,
        IntCounterVec::new(
            Opts::new("natter_http_requests_total", "API requests by method and status"),
            &["method", "status"]
        )
    );
    register!(HTTP_LATENCY, HistogramVec::new(
        HistogramOpts::new("natter_http_request_duration_seconds", "API request latency by method")
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method"]));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Recording helpers
// ============================================================================

fn get_counter_vec(metric: &OnceLock<IntCounterVec>) -> Option<&IntCounterVec> {
    metric.get()
}

/// Record a token store call.
#[inline]
pub fn record_token_op(backend: &str, op: &str, outcome: &str) {
    if let Some(c) = get_counter_vec(&TOKEN_OPS) {
        c.with_label_values(&[backend, op, outcome]).inc();
    }
}

/// Record a capability mint or verification.
#[inline]
pub fn record_capability_op(op: &str, outcome: &str) {
    if let Some(c) = get_counter_vec(&CAPABILITY_OPS) {
        c.with_label_values(&[op, outcome]).inc();
    }
}

/// Record an authorization decision.
#[inline]
pub fn record_authz_decision(outcome: &str) {
    if let Some(c) = get_counter_vec(&AUTHZ_DECISIONS) {
        c.with_label_values(&[outcome]).inc();
    }
}

/// Record one introspection call's latency.
#[inline]
pub fn observe_introspection(duration_secs: f64) {
    if let Some(h) = INTROSPECTION_LATENCY.get() {
        h.observe(duration_secs);
    }
}

/// Record a served API request.
#[inline]
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    if let Some(c) = get_counter_vec(&HTTP_REQUESTS) {
        let status = status.to_string();
        c.with_label_values(&[method, status.as_str()]).inc();
    }
    if let Some(h) = HTTP_LATENCY.get() {
        h.with_label_values(&[method]).observe(duration_secs);
    }
}
