use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics registry for the application.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Compilations attempted
    pub compilations_total: AtomicU64,
    pub compile_errors: AtomicU64,

    /// Slots registered across all successful compilations
    pub slots_registered_total: AtomicU64,

    /// Compile latency buckets (microseconds)
    pub latency_under_1ms: AtomicU64,
    pub latency_1_5ms: AtomicU64,
    pub latency_5_10ms: AtomicU64,
    pub latency_10_50ms: AtomicU64,
    pub latency_50_100ms: AtomicU64,
    pub latency_over_100ms: AtomicU64,

    /// Dynamic include resolution
    pub dynamic_resolutions_total: AtomicU64,
    pub dynamic_memo_hits: AtomicU64,
    pub dynamic_modules_absent: AtomicU64,
    pub dynamic_resolution_errors: AtomicU64,

    /// Executions started
    pub executions_total: AtomicU64,

    /// Stateful calls skipped because their gate was false
    pub gated_stateful_skips: AtomicU64,

    /// Graph reloads
    pub graph_reloads_total: AtomicU64,
    pub graph_reload_errors: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    /// Record a compilation outcome and the number of slots it produced.
    pub fn record_compilation(&self, slots: Option<usize>) {
        self.compilations_total.fetch_add(1, Ordering::Relaxed);
        match slots {
            Some(n) => {
                self.slots_registered_total
                    .fetch_add(n as u64, Ordering::Relaxed);
            }
            None => {
                self.compile_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record compile latency.
    pub fn record_latency(&self, start: Instant) {
        let micros = start.elapsed().as_micros() as u64;

        if micros < 1000 {
            self.latency_under_1ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 5000 {
            self.latency_1_5ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 10000 {
            self.latency_5_10ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 50000 {
            self.latency_10_50ms.fetch_add(1, Ordering::Relaxed);
        } else if micros < 100000 {
            self.latency_50_100ms.fetch_add(1, Ordering::Relaxed);
        } else {
            self.latency_over_100ms.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a lookup against the per-execution resolution memo.
    pub fn record_memo_lookup(&self, hit: bool) {
        if hit {
            self.dynamic_memo_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dynamic_resolutions_total
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a dynamic target whose root module does not exist.
    pub fn record_module_absent(&self) {
        self.dynamic_modules_absent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_error(&self) {
        self.dynamic_resolution_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_execution(&self) {
        self.executions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gated_skip(&self) {
        self.gated_stateful_skips.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a graph reload.
    pub fn record_graph_reload(&self, success: bool) {
        self.graph_reloads_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.graph_reload_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        format!(
            r#"# HELP rulegraph_compilations_total Total number of compilations
# TYPE rulegraph_compilations_total counter
rulegraph_compilations_total {}

# HELP rulegraph_compile_errors_total Compilations that failed
# TYPE rulegraph_compile_errors_total counter
rulegraph_compile_errors_total {}

# HELP rulegraph_slots_registered_total Slots registered by successful compilations
# TYPE rulegraph_slots_registered_total counter
rulegraph_slots_registered_total {}

# HELP rulegraph_compile_latency_bucket Compile latency histogram
# TYPE rulegraph_compile_latency_bucket counter
rulegraph_compile_latency_bucket{{le="0.001"}} {}
rulegraph_compile_latency_bucket{{le="0.005"}} {}
rulegraph_compile_latency_bucket{{le="0.01"}} {}
rulegraph_compile_latency_bucket{{le="0.05"}} {}
rulegraph_compile_latency_bucket{{le="0.1"}} {}
rulegraph_compile_latency_bucket{{le="+Inf"}} {}

# HELP rulegraph_dynamic_resolutions Dynamic include resolutions by outcome
# TYPE rulegraph_dynamic_resolutions counter
rulegraph_dynamic_resolutions{{outcome="resolved"}} {}
rulegraph_dynamic_resolutions{{outcome="memo_hit"}} {}
rulegraph_dynamic_resolutions{{outcome="absent"}} {}
rulegraph_dynamic_resolutions{{outcome="error"}} {}

# HELP rulegraph_executions_total Total executions started
# TYPE rulegraph_executions_total counter
rulegraph_executions_total {}

# HELP rulegraph_gated_stateful_skips_total Stateful calls skipped by a false gate
# TYPE rulegraph_gated_stateful_skips_total counter
rulegraph_gated_stateful_skips_total {}

# HELP rulegraph_graph_reloads_total Graph reload operations
# TYPE rulegraph_graph_reloads_total counter
rulegraph_graph_reloads_total {}

# HELP rulegraph_graph_reload_errors_total Graph reload errors
# TYPE rulegraph_graph_reload_errors_total counter
rulegraph_graph_reload_errors_total {}
"#,
            self.compilations_total.load(Ordering::Relaxed),
            self.compile_errors.load(Ordering::Relaxed),
            self.slots_registered_total.load(Ordering::Relaxed),
            self.latency_under_1ms.load(Ordering::Relaxed),
            self.latency_1_5ms.load(Ordering::Relaxed),
            self.latency_5_10ms.load(Ordering::Relaxed),
            self.latency_10_50ms.load(Ordering::Relaxed),
            self.latency_50_100ms.load(Ordering::Relaxed),
            self.latency_over_100ms.load(Ordering::Relaxed),
            self.dynamic_resolutions_total.load(Ordering::Relaxed),
            self.dynamic_memo_hits.load(Ordering::Relaxed),
            self.dynamic_modules_absent.load(Ordering::Relaxed),
            self.dynamic_resolution_errors.load(Ordering::Relaxed),
            self.executions_total.load(Ordering::Relaxed),
            self.gated_stateful_skips.load(Ordering::Relaxed),
            self.graph_reloads_total.load(Ordering::Relaxed),
            self.graph_reload_errors.load(Ordering::Relaxed),
        )
    }
}

/// Guard for timing operations.
pub struct TimingGuard<'a> {
    registry: &'a MetricsRegistry,
    start: Instant,
}

impl<'a> TimingGuard<'a> {
    pub fn new(registry: &'a MetricsRegistry) -> Self {
        TimingGuard {
            registry,
            start: Instant::now(),
        }
    }
}

impl<'a> Drop for TimingGuard<'a> {
    fn drop(&mut self) {
        self.registry.record_latency(self.start);
    }
}
