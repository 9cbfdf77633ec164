//! Observability infrastructure for the G6 collector
//!
//! This crate provides:
//! - Structured logging via tracing
//! - An explicit, injectable metrics registry with Prometheus export
//! - Per-component health tracking
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat, MetricsRegistry};
//!
//! init_logging("g6", LogFormat::Pretty)?;
//!
//! // Optional HTTP exporter; install before registering metrics
//! observability::init_metrics(9090)?;
//!
//! let registry = MetricsRegistry::new();
//! let ticks = registry.register_counter("collection_ticks_total", "Scheduler ticks")?;
//! ticks.increment(1);
//! ```

pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;

pub use error::{MetricsError, ObservabilityError, Result};
pub use health::{HealthMonitor, HealthThresholds};
pub use logging::{init_logging, init_logging_with_level, LogFormat};
pub use metrics::{
    init_metrics, CounterHandle, GaugeHandle, HistogramHandle, MetricKind, MetricSnapshot,
    MetricValue, MetricsRegistry, LATENCY_BUCKETS,
};
