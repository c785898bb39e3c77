use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry};
use std::sync::LazyLock;

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Proxy metrics
pub static PROXY_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "rapidapi_proxy_requests_total",
            "Proxied requests by route and upstream status",
        ),
        &["route", "status"],
    )
    .expect("static metric definition")
});

pub static PROXY_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("rapidapi_proxy_latency_seconds", "Upstream call latency")
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
    )
    .expect("static metric definition")
});

// Payment gate outcomes: missing, invalid, rejected, error, settled, unsettled
pub static PAYMENT_ATTEMPTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("rapidapi_payment_attempts_total", "Payment gate outcomes"),
        &["result"],
    )
    .expect("static metric definition")
});

/// Register all metrics with the registry
pub fn register_metrics() {
    let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
        Box::new(PROXY_REQUESTS_TOTAL.clone()),
        Box::new(PROXY_LATENCY.clone()),
        Box::new(PAYMENT_ATTEMPTS.clone()),
    ];
    for collector in collectors {
        if let Err(e) = REGISTRY.register(collector) {
            tracing::warn!(error = %e, "failed to register metric");
        }
    }
}

/// Render the registry in the Prometheus text format.
pub fn metrics_output() -> Result<String, prometheus::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
