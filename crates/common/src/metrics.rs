use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Process-wide metrics registry for engine observability.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    phase_runs: CounterVec,
    phase_seconds: HistogramVec,
    fragments_processed: CounterVec,
    rollback_deletes: CounterVec,
    broadcast_bytes: CounterVec,
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let phase_runs = CounterVec::new(
            Opts::new("cbf_phase_runs_total", "Lifecycle phase completions"),
            &["operator", "phase", "outcome"],
        )
        .expect("phase_runs opts");
        let phase_seconds = HistogramVec::new(
            HistogramOpts::new("cbf_phase_seconds", "Lifecycle phase wall time"),
            &["operator", "phase"],
        )
        .expect("phase_seconds opts");
        let fragments_processed = CounterVec::new(
            Opts::new(
                "cbf_fragments_processed_total",
                "Fragments processed by worker threads",
            ),
            &["operator"],
        )
        .expect("fragments_processed opts");
        let rollback_deletes = CounterVec::new(
            Opts::new(
                "cbf_rollback_deletes_total",
                "Fragments deleted by compensating rollback",
            ),
            &["operator"],
        )
        .expect("rollback_deletes opts");
        let broadcast_bytes = CounterVec::new(
            Opts::new("cbf_broadcast_bytes_total", "Broadcast envelope payload bytes"),
            &["operator"],
        )
        .expect("broadcast_bytes opts");

        registry
            .register(Box::new(phase_runs.clone()))
            .expect("register phase_runs");
        registry
            .register(Box::new(phase_seconds.clone()))
            .expect("register phase_seconds");
        registry
            .register(Box::new(fragments_processed.clone()))
            .expect("register fragments_processed");
        registry
            .register(Box::new(rollback_deletes.clone()))
            .expect("register rollback_deletes");
        registry
            .register(Box::new(broadcast_bytes.clone()))
            .expect("register broadcast_bytes");

        Self {
            registry,
            phase_runs,
            phase_seconds,
            fragments_processed,
            rollback_deletes,
            broadcast_bytes,
        }
    }
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Record one lifecycle phase completion with its wall time.
    pub fn record_phase(&self, operator: &str, phase: &str, outcome: &str, secs: f64) {
        self.inner
            .phase_runs
            .with_label_values(&[operator, phase, outcome])
            .inc();
        self.inner
            .phase_seconds
            .with_label_values(&[operator, phase])
            .observe(secs.max(0.0));
    }

    pub fn inc_fragments_processed(&self, operator: &str, count: u64) {
        self.inner
            .fragments_processed
            .with_label_values(&[operator])
            .inc_by(count as f64);
    }

    pub fn inc_rollback_deletes(&self, operator: &str, count: u64) {
        self.inner
            .rollback_deletes
            .with_label_values(&[operator])
            .inc_by(count as f64);
    }

    pub fn inc_broadcast_bytes(&self, operator: &str, bytes: u64) {
        self.inner
            .broadcast_bytes
            .with_label_values(&[operator])
            .inc_by(bytes as f64);
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn export(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        if encoder.encode(&families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Return the process-wide metrics registry.
pub fn global_metrics() -> &'static MetricsRegistry {
    static METRICS: OnceLock<MetricsRegistry> = OnceLock::new();
    METRICS.get_or_init(MetricsRegistry::new)
}
