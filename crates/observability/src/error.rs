//! Observability error types

use thiserror::Error;

/// Errors returned by the metrics registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("metric '{0}' is not registered")]
    UnknownMetric(String),

    #[error("metric '{name}' is a {actual}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: crate::metrics::MetricKind,
        actual: crate::metrics::MetricKind,
    },

    #[error("invalid metric name '{0}'")]
    InvalidName(String),
}

/// Errors from setting up logging, metrics export or health tracking
#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("metrics exporter failed: {0}")]
    Exporter(String),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
