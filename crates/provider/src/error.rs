//! Provider error types

use std::time::Duration;
use thiserror::Error;

/// Errors returned by data providers
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Transport failure, timeout or upstream outage
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Symbol the provider does not know how to quote
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Snapshot older than the freshness threshold
    #[error("stale data for {symbol}: age {age:?} exceeds threshold {threshold:?}")]
    StaleData {
        symbol: String,
        age: Duration,
        threshold: Duration,
    },
}

impl ProviderError {
    /// Transient errors worth retrying within the same cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::ProviderUnavailable(_) | ProviderError::StaleData { .. }
        )
    }

    /// Short label used in logs and health reports
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::ProviderUnavailable(_) => "provider_unavailable",
            ProviderError::InvalidSymbol(_) => "invalid_symbol",
            ProviderError::StaleData { .. } => "stale_data",
        }
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
