//! Data provider contract

use crate::error::ProviderResult;
use async_trait::async_trait;
use common::{HealthReport, OptionChainSnapshot};

/// Source of ATM strikes and option chain snapshots.
///
/// Implementations are interchangeable behind `Arc<dyn DataProvider>`.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Provider name, used as its health component
    fn name(&self) -> &str;

    /// Current at-the-money strike for an underlying
    async fn fetch_atm(&self, symbol: &str) -> ProviderResult<f64>;

    /// Option chain around the ATM strike.
    ///
    /// Fails with `StaleData` when the snapshot is older than the
    /// provider's freshness threshold.
    async fn fetch_overview(&self, symbol: &str) -> ProviderResult<OptionChainSnapshot>;

    /// Self-reported health. Never fails.
    async fn check_health(&self) -> HealthReport;
}
