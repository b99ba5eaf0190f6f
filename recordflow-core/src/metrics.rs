//! Prometheus-style metrics
//!
//! Lock-free counters, gauges and latency histograms for the read, write
//! and load paths, rendered in the Prometheus text format.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Anything that renders itself as one Prometheus metric family
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn help(&self) -> &str;
    /// `counter`, `gauge` or `histogram`
    fn kind(&self) -> &'static str;
    fn write_samples(&self, out: &mut String);

    fn render(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name(), self.help());
        let _ = writeln!(out, "# TYPE {} {}", self.name(), self.kind());
        self.write_samples(out);
    }
}

/// Monotonically increasing count
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn kind(&self) -> &'static str {
        "counter"
    }

    fn write_samples(&self, out: &mut String) {
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Value that moves both ways
pub struct Gauge {
    name: String,
    help: String,
    value: AtomicI64,
}

impl Gauge {
    pub fn new(name: &str, help: &str) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Metric for Gauge {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn kind(&self) -> &'static str {
        "gauge"
    }

    fn write_samples(&self, out: &mut String) {
        let _ = writeln!(out, "{} {}", self.name, self.get());
    }
}

/// Upper bounds in seconds, from 10µs to 1s
const LATENCY_BOUNDS: [f64; 11] = [1e-5, 5e-5, 1e-4, 5e-4, 1e-3, 5e-3, 1e-2, 5e-2, 0.1, 0.5, 1.0];

/// Latency distribution in seconds
///
/// Each observation lands in exactly one slot; the cumulative `le`
/// buckets are computed at render time.
pub struct Histogram {
    name: String,
    help: String,
    bounds: Vec<f64>,
    /// One slot per bound plus the overflow slot
    slots: Vec<AtomicU64>,
    sum_micros: AtomicU64,
}

impl Histogram {
    pub fn new(name: &str, help: &str) -> Self {
        Self::with_bounds(name, help, LATENCY_BOUNDS.to_vec())
    }

    /// `bounds` must be sorted ascending
    pub fn with_bounds(name: &str, help: &str, bounds: Vec<f64>) -> Self {
        let slots = (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            name: name.into(),
            help: help.into(),
            bounds,
            slots,
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, seconds: f64) {
        let slot = self.bounds.partition_point(|&bound| bound < seconds);
        self.slots[slot].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((seconds * 1e6).max(0.0) as u64, Ordering::Relaxed);
    }

    /// Observe the time until the returned guard drops
    pub fn start_timer(&self) -> HistogramTimer<'_> {
        HistogramTimer {
            histogram: self,
            start: Instant::now(),
        }
    }

    pub fn count(&self) -> u64 {
        self.slots.iter().map(|s| s.load(Ordering::Relaxed)).sum()
    }
}

impl Metric for Histogram {
    fn name(&self) -> &str {
        &self.name
    }

    fn help(&self) -> &str {
        &self.help
    }

    fn kind(&self) -> &'static str {
        "histogram"
    }

    fn write_samples(&self, out: &mut String) {
        let mut cumulative = 0;
        for (bound, slot) in self.bounds.iter().zip(&self.slots) {
            cumulative += slot.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", self.name, bound, cumulative);
        }
        let count = self.count();
        let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", self.name, count);
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1e6;
        let _ = writeln!(out, "{}_sum {}", self.name, sum);
        let _ = writeln!(out, "{}_count {}", self.name, count);
    }
}

/// Records elapsed time into a histogram on drop
pub struct HistogramTimer<'a> {
    histogram: &'a Histogram,
    start: Instant,
}

impl Drop for HistogramTimer<'_> {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Metrics owned by one component, e.g. a single loader
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Arc<Counter>>>,
    gauges: RwLock<BTreeMap<String, Arc<Gauge>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
}

fn get_or_register<M>(map: &RwLock<BTreeMap<String, Arc<M>>>, name: &str, make: impl FnOnce() -> M) -> Arc<M> {
    if let Some(existing) = map.read().get(name) {
        return existing.clone();
    }
    map.write()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(make()))
        .clone()
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str, help: &str) -> Arc<Counter> {
        get_or_register(&self.counters, name, || Counter::new(name, help))
    }

    pub fn gauge(&self, name: &str, help: &str) -> Arc<Gauge> {
        get_or_register(&self.gauges, name, || Gauge::new(name, help))
    }

    pub fn histogram(&self, name: &str, help: &str) -> Arc<Histogram> {
        get_or_register(&self.histograms, name, || Histogram::new(name, help))
    }

    /// Render every registered metric
    pub fn export(&self) -> String {
        let mut out = String::new();
        self.counters.read().values().for_each(|m| m.render(&mut out));
        self.gauges.read().values().for_each(|m| m.render(&mut out));
        self.histograms.read().values().for_each(|m| m.render(&mut out));
        out
    }
}

/// Process-wide metrics
pub mod standard {
    use super::{Counter, Gauge, Histogram};
    use std::sync::LazyLock;

    pub static RECORDS_READ: LazyLock<Counter> =
        LazyLock::new(|| Counter::new("recordflow_records_read_total", "Records decoded from record files"));

    pub static BYTES_READ: LazyLock<Counter> =
        LazyLock::new(|| Counter::new("recordflow_bytes_read_total", "Payload bytes read from record files"));

    pub static RECORDS_WRITTEN: LazyLock<Counter> =
        LazyLock::new(|| Counter::new("recordflow_records_written_total", "Records written during preparation"));

    pub static BATCHES_PRODUCED: LazyLock<Counter> =
        LazyLock::new(|| Counter::new("recordflow_batches_produced_total", "Batches handed to consumers"));

    pub static ACTIVE_WORKERS: LazyLock<Gauge> =
        LazyLock::new(|| Gauge::new("recordflow_active_workers", "Loader workers currently running"));

    pub static READ_DURATION: LazyLock<Histogram> =
        LazyLock::new(|| Histogram::new("recordflow_read_duration_seconds", "Single record read latency"));
}

/// Render all process-wide metrics
pub fn gather_metrics() -> String {
    let families: [&dyn Metric; 6] = [
        &*standard::RECORDS_READ,
        &*standard::BYTES_READ,
        &*standard::RECORDS_WRITTEN,
        &*standard::BATCHES_PRODUCED,
        &*standard::ACTIVE_WORKERS,
        &*standard::READ_DURATION,
    ];
    let mut out = String::new();
    for family in families {
        family.render(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_and_gauge() {
        let counter = Counter::new("reads_total", "Reads");
        counter.inc();
        counter.inc_by(5);
        assert_eq!(counter.get(), 6);

        let gauge = Gauge::new("workers", "Workers");
        gauge.set(10);
        gauge.dec();
        assert_eq!(gauge.get(), 9);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let histogram = Histogram::new("latency", "Latency");
        histogram.observe(0.00002);
        histogram.observe(0.00005);
        histogram.observe(0.002);
        histogram.observe(3.0);

        let mut out = String::new();
        histogram.render(&mut out);
        assert!(out.contains("# TYPE latency histogram"));
        assert!(out.contains("latency_bucket{le=\"0.00001\"} 0"));
        assert!(out.contains("latency_bucket{le=\"0.00005\"} 2"));
        assert!(out.contains("latency_bucket{le=\"1\"} 3"));
        assert!(out.contains("latency_bucket{le=\"+Inf\"} 4"));
        assert!(out.contains("latency_count 4"));
    }

    #[test]
    fn test_timer_observes_on_drop() {
        let histogram = Histogram::new("t", "T");
        {
            let _timer = histogram.start_timer();
        }
        assert_eq!(histogram.count(), 1);
    }

    #[test]
    fn test_registry_returns_shared_handles() {
        let registry = MetricsRegistry::new();
        registry.counter("a_total", "A").inc();
        registry.counter("a_total", "A").inc();
        assert_eq!(registry.counter("a_total", "A").get(), 2);
        assert!(registry.export().contains("a_total 2"));
        assert!(gather_metrics().contains("# TYPE recordflow_active_workers gauge"));
    }
}
