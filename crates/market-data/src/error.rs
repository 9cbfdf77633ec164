//! Market data error types

use thiserror::Error;

/// Errors that can occur while building market data components
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    /// Invalid calendar or solver configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid pricing input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
