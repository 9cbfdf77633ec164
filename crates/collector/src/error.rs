//! Collector error types

use market_data::MarketDataError;
use observability::{MetricsError, ObservabilityError};
use thiserror::Error;

/// Errors from building or driving the collection scheduler.
///
/// Per-cycle provider failures never surface here; they end as a faulted
/// cycle outcome.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is not running")]
    NotRunning,

    #[error("symbol '{0}' is not configured for collection")]
    UnknownSymbol(String),

    #[error("recorder task has stopped")]
    RecorderClosed,

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

impl From<MarketDataError> for CollectorError {
    fn from(err: MarketDataError) -> Self {
        CollectorError::Configuration(err.to_string())
    }
}

impl From<ObservabilityError> for CollectorError {
    fn from(err: ObservabilityError) -> Self {
        CollectorError::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CollectorError>;
