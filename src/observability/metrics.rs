use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec, TextEncoder,
};

// Metrics registry
static RATE_LIMIT_CHECKS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_checks_total",
        "Total number of rate limit checks",
        &["policy", "outcome"]
    )
    .unwrap()
});

static RATE_LIMIT_CHECK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "rate_limit_check_duration_seconds",
        "Rate limit check latency in seconds",
        &["backend"],
        vec![0.0005, 0.001, 0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.500]
    )
    .unwrap()
});

static RATE_LIMITER_DEGRADED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limiter_degraded_total",
        "Total number of degraded-mode rate limit events",
        &["policy", "mode"]
    )
    .unwrap()
});

static RATE_LIMIT_RESETS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "rate_limit_resets_total",
        "Total number of administrative rate limit resets",
        &["policy"]
    )
    .unwrap()
});

pub struct MetricsRecorder;

impl MetricsRecorder {
    pub fn record_check(policy: &str, allowed: bool) {
        let outcome = if allowed { "allowed" } else { "denied" };
        RATE_LIMIT_CHECKS_TOTAL
            .with_label_values(&[policy, outcome])
            .inc();
    }

    pub fn record_check_duration(backend: &str, duration: f64) {
        RATE_LIMIT_CHECK_DURATION
            .with_label_values(&[backend])
            .observe(duration);
    }

    /// `mode` is one of `fail_open`, `fail_closed`, `fallback`
    pub fn record_degraded(policy: &str, mode: &str) {
        RATE_LIMITER_DEGRADED_TOTAL
            .with_label_values(&[policy, mode])
            .inc();
    }

    pub fn record_reset(policy: &str) {
        RATE_LIMIT_RESETS_TOTAL.with_label_values(&[policy]).inc();
    }

    /// Export all metrics in Prometheus format
    pub fn export() -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        encoder.encode_to_string(&metric_families)
    }
}
