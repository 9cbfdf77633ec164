//! Option chain data providers
//!
//! Every provider implements [`DataProvider`] and is used through
//! `Arc<dyn DataProvider>`, so the collector never knows which one it has.
//!
//! - [`mock`] - Seeded, deterministic chains with scripted failures
//! - `live` - Kite-style REST client (feature `live`)
//! - [`chain`] - Strike ladder, expiry and freshness helpers

pub mod chain;
pub mod error;
#[cfg(feature = "live")]
pub mod live;
pub mod mock;
pub mod traits;

pub use error::{ProviderError, ProviderResult};
#[cfg(feature = "live")]
pub use live::LiveProvider;
pub use mock::{MockActivity, MockCallCounts, MockProvider, MockScenario, ScriptedFailure};
pub use traits::DataProvider;

use config::{ProviderConfig, ProviderKind};
use std::sync::Arc;
use tracing::info;

/// Build the provider selected by configuration
pub fn build_provider(cfg: &ProviderConfig) -> ProviderResult<Arc<dyn DataProvider>> {
    let provider: Arc<dyn DataProvider> = match cfg.kind {
        ProviderKind::Mock => Arc::new(MockProvider::from_config(cfg)),
        #[cfg(feature = "live")]
        ProviderKind::Live => Arc::new(LiveProvider::from_config(cfg)?),
        #[cfg(not(feature = "live"))]
        ProviderKind::Live => {
            return Err(ProviderError::ProviderUnavailable(
                "live provider requires the `live` feature".to_string(),
            ))
        }
    };
    info!(provider = provider.name(), "Data provider ready");
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_mock_provider() {
        let provider = build_provider(&ProviderConfig::default()).unwrap();
        assert_eq!(provider.name(), "mock");
    }
}
