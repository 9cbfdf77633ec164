//! Metrics registry and Prometheus export
//!
//! Metrics are registered explicitly on a [`MetricsRegistry`] that is
//! injected where it is needed. Registration hands back a typed handle;
//! updates are lock-free atomics and are mirrored to the `metrics` facade,
//! so an exporter installed with [`init_metrics`] serves the same values.

use crate::error::{MetricsError, ObservabilityError};
use metrics_exporter_prometheus::PrometheusBuilder;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fixed latency buckets (seconds) shared by every histogram
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint. Call it before registering metrics so the
/// registry's mirrored handles bind to the installed recorder.
///
/// # Example
///
/// ```ignore
/// observability::metrics::init_metrics(9090)?;
/// // Metrics available at http://localhost:9090/metrics
/// ```
pub fn init_metrics(port: u16) -> crate::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port)
        .parse()
        .map_err(|e| ObservabilityError::Configuration(format!("invalid metrics port: {}", e)))?;

    PrometheusBuilder::new()
        .set_buckets(LATENCY_BUCKETS)
        .map_err(|e| ObservabilityError::Exporter(e.to_string()))?
        .with_http_listener(addr)
        .install()
        .map_err(|e| ObservabilityError::Exporter(e.to_string()))?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Gauge => write!(f, "gauge"),
            MetricKind::Histogram => write!(f, "histogram"),
        }
    }
}

// The facade handles have no `Debug`, so the cells print their values only.
struct CounterCell {
    value: AtomicU64,
    mirror: metrics::Counter,
}

impl fmt::Debug for CounterCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterCell")
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

struct GaugeCell {
    bits: AtomicU64,
    mirror: metrics::Gauge,
}

impl fmt::Debug for GaugeCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaugeCell")
            .field("value", &f64::from_bits(self.bits.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

struct HistogramCell {
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
    mirror: metrics::Histogram,
}

impl fmt::Debug for HistogramCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistogramCell")
            .field("count", &self.count)
            .field("sum", &f64::from_bits(self.sum_bits.load(Ordering::Relaxed)))
            .finish_non_exhaustive()
    }
}

/// Add `delta` to an f64 stored as bits
fn add_f64(cell: &AtomicU64, delta: f64) -> f64 {
    let mut current = cell.load(Ordering::Relaxed);
    loop {
        let next = f64::from_bits(current) + delta;
        match cell.compare_exchange_weak(
            current,
            next.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}

/// Handle to a registered counter
#[derive(Debug, Clone)]
pub struct CounterHandle {
    name: Arc<str>,
    cell: Arc<CounterCell>,
}

impl CounterHandle {
    pub fn increment(&self, by: u64) {
        self.cell.value.fetch_add(by, Ordering::Relaxed);
        self.cell.mirror.increment(by);
    }

    pub fn get(&self) -> u64 {
        self.cell.value.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a registered gauge
#[derive(Debug, Clone)]
pub struct GaugeHandle {
    name: Arc<str>,
    cell: Arc<GaugeCell>,
}

impl GaugeHandle {
    pub fn set(&self, value: f64) {
        self.cell.bits.store(value.to_bits(), Ordering::Relaxed);
        self.cell.mirror.set(value);
    }

    pub fn increment(&self, by: f64) {
        add_f64(&self.cell.bits, by);
        self.cell.mirror.increment(by);
    }

    pub fn decrement(&self, by: f64) {
        add_f64(&self.cell.bits, -by);
        self.cell.mirror.decrement(by);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.cell.bits.load(Ordering::Relaxed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Handle to a registered histogram
#[derive(Debug, Clone)]
pub struct HistogramHandle {
    name: Arc<str>,
    cell: Arc<HistogramCell>,
}

impl HistogramHandle {
    pub fn observe(&self, value: f64) {
        // Values above the last bound only land in the implicit +Inf bucket
        if let Some(idx) = LATENCY_BUCKETS.iter().position(|le| value <= *le) {
            self.cell.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.cell.count.fetch_add(1, Ordering::Relaxed);
        add_f64(&self.cell.sum_bits, value);
        self.cell.mirror.record(value);
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.cell.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.cell.sum_bits.load(Ordering::Relaxed))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
enum Metric {
    Counter(CounterHandle),
    Gauge(GaugeHandle),
    Histogram(HistogramHandle),
}

impl Metric {
    fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::Histogram(_) => MetricKind::Histogram,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    help: String,
    metric: Metric,
}

/// Cumulative histogram bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub le: f64,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MetricValue {
    Counter {
        value: u64,
    },
    Gauge {
        value: f64,
    },
    Histogram {
        count: u64,
        sum: f64,
        buckets: Vec<BucketCount>,
    },
}

/// Point-in-time view of a single metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub name: String,
    pub help: String,
    pub value: MetricValue,
}

/// Registry of named metrics.
///
/// Names are unique across all kinds; there is no reset.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    metrics: RwLock<BTreeMap<String, Entry>>,
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, help: &str, build: impl FnOnce(Arc<str>) -> Metric) -> Result<Metric, MetricsError> {
        if !is_valid_name(name) {
            return Err(MetricsError::InvalidName(name.to_string()));
        }

        let mut metrics = self.metrics.write();
        if metrics.contains_key(name) {
            return Err(MetricsError::AlreadyRegistered(name.to_string()));
        }

        let metric = build(Arc::from(name));
        metrics.insert(
            name.to_string(),
            Entry {
                help: help.to_string(),
                metric: metric.clone(),
            },
        );
        tracing::debug!(metric = name, kind = %metric.kind(), "Metric registered");
        Ok(metric)
    }

    pub fn register_counter(&self, name: &str, help: &str) -> Result<CounterHandle, MetricsError> {
        let metric = self.insert(name, help, |name| {
            metrics::describe_counter!(name.to_string(), help.to_string());
            Metric::Counter(CounterHandle {
                cell: Arc::new(CounterCell {
                    value: AtomicU64::new(0),
                    mirror: metrics::counter!(name.to_string()),
                }),
                name,
            })
        })?;
        match metric {
            Metric::Counter(handle) => Ok(handle),
            other => Err(mismatch(name, MetricKind::Counter, other.kind())),
        }
    }

    pub fn register_gauge(&self, name: &str, help: &str) -> Result<GaugeHandle, MetricsError> {
        let metric = self.insert(name, help, |name| {
            metrics::describe_gauge!(name.to_string(), help.to_string());
            Metric::Gauge(GaugeHandle {
                cell: Arc::new(GaugeCell {
                    bits: AtomicU64::new(0f64.to_bits()),
                    mirror: metrics::gauge!(name.to_string()),
                }),
                name,
            })
        })?;
        match metric {
            Metric::Gauge(handle) => Ok(handle),
            other => Err(mismatch(name, MetricKind::Gauge, other.kind())),
        }
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
    ) -> Result<HistogramHandle, MetricsError> {
        let metric = self.insert(name, help, |name| {
            metrics::describe_histogram!(
                name.to_string(),
                metrics::Unit::Seconds,
                help.to_string()
            );
            Metric::Histogram(HistogramHandle {
                cell: Arc::new(HistogramCell {
                    buckets: LATENCY_BUCKETS.iter().map(|_| AtomicU64::new(0)).collect(),
                    count: AtomicU64::new(0),
                    sum_bits: AtomicU64::new(0f64.to_bits()),
                    mirror: metrics::histogram!(name.to_string()),
                }),
                name,
            })
        })?;
        match metric {
            Metric::Histogram(handle) => Ok(handle),
            other => Err(mismatch(name, MetricKind::Histogram, other.kind())),
        }
    }

    fn lookup(&self, name: &str) -> Result<Metric, MetricsError> {
        self.metrics
            .read()
            .get(name)
            .map(|entry| entry.metric.clone())
            .ok_or_else(|| MetricsError::UnknownMetric(name.to_string()))
    }

    /// Increment a counter by name
    pub fn increment(&self, name: &str, by: u64) -> Result<(), MetricsError> {
        match self.lookup(name)? {
            Metric::Counter(handle) => {
                handle.increment(by);
                Ok(())
            }
            other => Err(mismatch(name, MetricKind::Counter, other.kind())),
        }
    }

    /// Set a gauge by name
    pub fn set_gauge(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        match self.lookup(name)? {
            Metric::Gauge(handle) => {
                handle.set(value);
                Ok(())
            }
            other => Err(mismatch(name, MetricKind::Gauge, other.kind())),
        }
    }

    /// Record a histogram observation by name
    pub fn observe(&self, name: &str, value: f64) -> Result<(), MetricsError> {
        match self.lookup(name)? {
            Metric::Histogram(handle) => {
                handle.observe(value);
                Ok(())
            }
            other => Err(mismatch(name, MetricKind::Histogram, other.kind())),
        }
    }

    /// Current value of a counter
    pub fn counter_value(&self, name: &str) -> Result<u64, MetricsError> {
        match self.lookup(name)? {
            Metric::Counter(handle) => Ok(handle.get()),
            other => Err(mismatch(name, MetricKind::Counter, other.kind())),
        }
    }

    /// Current value of a gauge
    pub fn gauge_value(&self, name: &str) -> Result<f64, MetricsError> {
        match self.lookup(name)? {
            Metric::Gauge(handle) => Ok(handle.get()),
            other => Err(mismatch(name, MetricKind::Gauge, other.kind())),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.read().is_empty()
    }

    /// Every metric, sorted by name
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        self.metrics
            .read()
            .iter()
            .map(|(name, entry)| MetricSnapshot {
                name: name.clone(),
                help: entry.help.clone(),
                value: match &entry.metric {
                    Metric::Counter(h) => MetricValue::Counter { value: h.get() },
                    Metric::Gauge(h) => MetricValue::Gauge { value: h.get() },
                    Metric::Histogram(h) => {
                        let mut cumulative = 0;
                        let buckets = LATENCY_BUCKETS
                            .iter()
                            .zip(&h.cell.buckets)
                            .map(|(le, count)| {
                                cumulative += count.load(Ordering::Relaxed);
                                BucketCount {
                                    le: *le,
                                    count: cumulative,
                                }
                            })
                            .collect();
                        MetricValue::Histogram {
                            count: h.count(),
                            sum: h.sum(),
                            buckets,
                        }
                    }
                },
            })
            .collect()
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();
        for metric in self.snapshot() {
            let kind = match metric.value {
                MetricValue::Counter { .. } => MetricKind::Counter,
                MetricValue::Gauge { .. } => MetricKind::Gauge,
                MetricValue::Histogram { .. } => MetricKind::Histogram,
            };
            let _ = writeln!(out, "# HELP {} {}", metric.name, metric.help);
            let _ = writeln!(out, "# TYPE {} {}", metric.name, kind);

            match &metric.value {
                MetricValue::Counter { value } => {
                    let _ = writeln!(out, "{} {}", metric.name, value);
                }
                MetricValue::Gauge { value } => {
                    let _ = writeln!(out, "{} {}", metric.name, value);
                }
                MetricValue::Histogram {
                    count,
                    sum,
                    buckets,
                } => {
                    for bucket in buckets {
                        let _ = writeln!(
                            out,
                            "{}_bucket{{le=\"{}\"}} {}",
                            metric.name, bucket.le, bucket.count
                        );
                    }
                    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", metric.name, count);
                    let _ = writeln!(out, "{}_sum {}", metric.name, sum);
                    let _ = writeln!(out, "{}_count {}", metric.name, count);
                }
            }
        }
        out
    }
}

fn mismatch(name: &str, expected: MetricKind, actual: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: name.to_string(),
        expected,
        actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_duplicate_registration_fails() {
        let registry = MetricsRegistry::new();
        registry.register_counter("ticks_total", "ticks").unwrap();

        assert_matches!(
            registry.register_counter("ticks_total", "again"),
            Err(MetricsError::AlreadyRegistered(name)) if name == "ticks_total"
        );
        // Names are unique across kinds
        assert_matches!(
            registry.register_gauge("ticks_total", "gauge"),
            Err(MetricsError::AlreadyRegistered(_))
        );
    }

    #[test]
    fn test_unknown_and_mismatched_access() {
        let registry = MetricsRegistry::new();
        registry.register_gauge("in_flight", "in flight").unwrap();

        assert_matches!(
            registry.increment("missing_total", 1),
            Err(MetricsError::UnknownMetric(_))
        );
        assert_matches!(
            registry.increment("in_flight", 1),
            Err(MetricsError::KindMismatch {
                expected: MetricKind::Counter,
                actual: MetricKind::Gauge,
                ..
            })
        );
        assert_matches!(
            registry.observe("in_flight", 0.1),
            Err(MetricsError::KindMismatch { .. })
        );
    }

    #[test]
    fn test_handles_format_with_debug() {
        let registry = MetricsRegistry::new();
        let counter = registry.register_counter("debug_total", "debug").unwrap();
        let gauge = registry.register_gauge("debug_gauge", "debug").unwrap();
        let histogram = registry
            .register_histogram("debug_seconds", "debug")
            .unwrap();
        counter.increment(3);
        gauge.set(1.5);
        histogram.observe(0.2);

        let rendered = format!("{:?} {:?} {:?}", counter, gauge, histogram);
        assert!(rendered.contains("debug_total"));
        assert!(rendered.contains("value: 1.5"));
        assert!(rendered.contains("count: 1"));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let registry = MetricsRegistry::new();
        assert_matches!(
            registry.register_counter("9lives", ""),
            Err(MetricsError::InvalidName(_))
        );
        assert_matches!(
            registry.register_counter("has space", ""),
            Err(MetricsError::InvalidName(_))
        );
    }

    #[test]
    fn test_concurrent_increments_sum_exactly() {
        let registry = Arc::new(MetricsRegistry::new());
        let handle = registry.register_counter("hits_total", "hits").unwrap();

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let handle = handle.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        if i % 2 == 0 {
                            handle.increment(1);
                        } else {
                            registry.increment("hits_total", 1).unwrap();
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.counter_value("hits_total").unwrap(), 80_000);
    }

    #[test]
    fn test_concurrent_gauge_adjustments_balance() {
        let registry = MetricsRegistry::new();
        let gauge = registry.register_gauge("in_flight", "in flight").unwrap();

        std::thread::scope(|s| {
            for _ in 0..4 {
                let gauge = gauge.clone();
                s.spawn(move || {
                    for _ in 0..1_000 {
                        gauge.increment(1.0);
                        gauge.decrement(1.0);
                    }
                });
            }
        });

        assert_eq!(gauge.get(), 0.0);
    }

    #[test]
    fn test_snapshot_sorted_and_serializable() {
        let registry = MetricsRegistry::new();
        registry.register_counter("zeta_total", "z").unwrap().increment(3);
        registry.register_gauge("alpha", "a").unwrap().set(2.5);
        let hist = registry.register_histogram("mid_seconds", "m").unwrap();
        hist.observe(0.02);
        hist.observe(0.3);
        hist.observe(120.0);

        let snapshot = registry.snapshot();
        let names: Vec<&str> = snapshot.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid_seconds", "zeta_total"]);

        assert_eq!(snapshot[0].value, MetricValue::Gauge { value: 2.5 });
        assert_eq!(snapshot[2].value, MetricValue::Counter { value: 3 });
        match &snapshot[1].value {
            MetricValue::Histogram { count, buckets, .. } => {
                assert_eq!(*count, 3);
                let le_0_025 = buckets.iter().find(|b| b.le == 0.025).unwrap();
                assert_eq!(le_0_025.count, 1);
                let le_60 = buckets.iter().find(|b| b.le == 60.0).unwrap();
                assert_eq!(le_60.count, 2);
            }
            other => panic!("expected histogram, got {:?}", other),
        }

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: Vec<MetricSnapshot> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_render_prometheus() {
        let registry = MetricsRegistry::new();
        registry
            .register_counter("collection_ticks_total", "Scheduler ticks")
            .unwrap()
            .increment(7);
        registry
            .register_histogram("collection_cycle_duration_seconds", "Cycle duration")
            .unwrap()
            .observe(0.2);

        let text = registry.render_prometheus();
        assert!(text.contains("# TYPE collection_ticks_total counter\n"));
        assert!(text.contains("collection_ticks_total 7\n"));
        assert!(text.contains("collection_cycle_duration_seconds_bucket{le=\"0.25\"} 1\n"));
        assert!(text.contains("collection_cycle_duration_seconds_bucket{le=\"0.1\"} 0\n"));
        assert!(text.contains("collection_cycle_duration_seconds_bucket{le=\"+Inf\"} 1\n"));
        assert!(text.contains("collection_cycle_duration_seconds_count 1\n"));
    }
}
