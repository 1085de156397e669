//! Metrics collection and export module

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

/// Orchestration metrics
pub struct Metrics {
    registry: Registry,

    // Transactions
    pub tx_built: IntCounter,
    pub tx_submitted: IntCounter,
    pub tx_confirmed: IntCounter,
    pub tx_failed: IntCounterVec,
    pub send_retries: IntCounter,

    // Lookup tables
    pub alt_chunks_sent: IntCounter,
    pub alt_chunk_retries: IntCounter,
    pub alt_addresses_added: IntCounter,

    // Events
    pub events_captured: IntCounterVec,
    pub event_decode_errors: IntCounter,
    pub active_subscriptions: IntGauge,

    // Histograms
    pub build_latency: Histogram,
    pub confirm_latency: Histogram,
    pub table_visibility_wait: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let tx_built = IntCounter::with_opts(Opts::new("tx_built_total", "Transactions built and signed"))?;

        let tx_submitted = IntCounter::with_opts(Opts::new(
            "tx_submitted_total",
            "Transactions handed to the RPC node",
        ))?;

        let tx_confirmed = IntCounter::with_opts(Opts::new(
            "tx_confirmed_total",
            "Transactions that reached the target commitment",
        ))?;

        let tx_failed = IntCounterVec::new(
            Opts::new("tx_failed_total", "Failed submissions by error category"),
            &["category"],
        )?;

        let send_retries = IntCounter::with_opts(Opts::new(
            "tx_send_retries_total",
            "Client-side resends of the same signed transaction",
        ))?;

        let alt_chunks_sent = IntCounter::with_opts(Opts::new(
            "alt_extend_chunks_total",
            "Lookup table extend chunks confirmed",
        ))?;

        let alt_chunk_retries = IntCounter::with_opts(Opts::new(
            "alt_extend_chunk_retries_total",
            "Lookup table extend chunks rebuilt after a failure",
        ))?;

        let alt_addresses_added = IntCounter::with_opts(Opts::new(
            "alt_addresses_added_total",
            "Addresses submitted to lookup tables",
        ))?;

        let events_captured = IntCounterVec::new(
            Opts::new("events_captured_total", "Program events buffered, by kind"),
            &["kind"],
        )?;

        let event_decode_errors = IntCounter::with_opts(Opts::new(
            "event_decode_errors_total",
            "Program data lines with a known discriminator that failed to decode",
        ))?;

        let active_subscriptions = IntGauge::with_opts(Opts::new(
            "event_subscriptions_active",
            "Event subscriptions currently registered",
        ))?;

        let build_latency = Histogram::with_opts(
            HistogramOpts::new("build_latency_seconds", "Transaction build latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0]),
        )?;

        let confirm_latency = Histogram::with_opts(
            HistogramOpts::new("confirm_latency_seconds", "Send-to-confirmation latency")
                .buckets(vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 90.0]),
        )?;

        let table_visibility_wait = Histogram::with_opts(
            HistogramOpts::new(
                "alt_visibility_wait_seconds",
                "Time until a lookup table became visible at the required length",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;

        registry.register(Box::new(tx_built.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_confirmed.clone()))?;
        registry.register(Box::new(tx_failed.clone()))?;
        registry.register(Box::new(send_retries.clone()))?;
        registry.register(Box::new(alt_chunks_sent.clone()))?;
        registry.register(Box::new(alt_chunk_retries.clone()))?;
        registry.register(Box::new(alt_addresses_added.clone()))?;
        registry.register(Box::new(events_captured.clone()))?;
        registry.register(Box::new(event_decode_errors.clone()))?;
        registry.register(Box::new(active_subscriptions.clone()))?;
        registry.register(Box::new(build_latency.clone()))?;
        registry.register(Box::new(confirm_latency.clone()))?;
        registry.register(Box::new(table_visibility_wait.clone()))?;

        Ok(Self {
            registry,
            tx_built,
            tx_submitted,
            tx_confirmed,
            tx_failed,
            send_retries,
            alt_chunks_sent,
            alt_chunk_retries,
            alt_addresses_added,
            events_captured,
            event_decode_errors,
            active_subscriptions,
            build_latency,
            confirm_latency,
            table_visibility_wait,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_failure(&self, category: &str) {
        self.tx_failed.with_label_values(&[category]).inc();
    }

    pub fn record_event(&self, kind: &str) {
        self.events_captured.with_label_values(&[kind]).inc();
    }

    /// Prometheus text exposition of every registered metric
    pub fn export_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}

/// Timer helper for measuring operation duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn observe_duration(&self, histogram: &Histogram) {
        histogram.observe(self.start.elapsed().as_secs_f64());
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
