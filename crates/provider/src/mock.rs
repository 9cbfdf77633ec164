//! Deterministic mock provider
//!
//! Generates option chains from the Black-Scholes model with a seeded
//! PCG64 generator, so the same seed and call sequence always yields the
//! same data. Scenarios and a queue of scripted failures let tests drive
//! every error path without a network.

use crate::chain::{atm_strike, check_freshness, strike_ladder, strike_step};
use crate::error::{ProviderError, ProviderResult};
use crate::traits::DataProvider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HealthReport, HealthStatus, OptionChainSnapshot, OptionQuote, OptionType};
use config::{MockActivityConfig, MockScenarioConfig, ProviderConfig};
use market_data::black_scholes::black_scholes_price;
use market_data::BSInputs;
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace};

/// Quotes never go below one tick
const MIN_PRICE: f64 = 0.05;
const TICK: f64 = 0.05;

/// Scenario the mock plays out on every call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockScenario {
    #[default]
    Normal,
    /// Frozen, zero-volume quotes older than the freshness threshold
    MarketClosed,
    /// Normal quotes with an expired timestamp
    StaleData,
    /// Every fetch fails with `ProviderUnavailable`
    ProviderError,
    /// ATM resolves but the chain has no quotes
    EmptyChain,
}

impl From<MockScenarioConfig> for MockScenario {
    fn from(cfg: MockScenarioConfig) -> Self {
        match cfg {
            MockScenarioConfig::Normal => MockScenario::Normal,
            MockScenarioConfig::MarketClosed => MockScenario::MarketClosed,
            MockScenarioConfig::StaleData => MockScenario::StaleData,
            MockScenarioConfig::ProviderError => MockScenario::ProviderError,
            MockScenarioConfig::EmptyChain => MockScenario::EmptyChain,
        }
    }
}

/// How open interest and volume are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockActivity {
    /// Random, weighted towards the money
    #[default]
    Seeded,
    /// The same values on every strike
    Fixed {
        call_oi: u64,
        put_oi: u64,
        call_volume: u64,
        put_volume: u64,
    },
}

impl From<MockActivityConfig> for MockActivity {
    fn from(cfg: MockActivityConfig) -> Self {
        match cfg {
            MockActivityConfig::Seeded => MockActivity::Seeded,
            MockActivityConfig::Fixed {
                call_oi,
                put_oi,
                call_volume,
                put_volume,
            } => MockActivity::Fixed {
                call_oi,
                put_oi,
                call_volume,
                put_volume,
            },
        }
    }
}

/// A failure returned by the next provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    ProviderUnavailable,
    StaleData,
    InvalidSymbol,
}

/// Calls observed by the mock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCallCounts {
    pub fetch_atm: u64,
    pub fetch_overview: u64,
    pub check_health: u64,
}

impl MockCallCounts {
    /// Fetch calls (health checks excluded)
    pub fn fetches(&self) -> u64 {
        self.fetch_atm + self.fetch_overview
    }
}

#[derive(Debug, Clone)]
struct Underlying {
    spot: f64,
    volatility: f64,
}

#[derive(Debug)]
struct MockState {
    rng: Pcg64,
    scenario: MockScenario,
    failures: VecDeque<ScriptedFailure>,
    underlyings: BTreeMap<String, Underlying>,
    fixed_time: Option<DateTime<Utc>>,
    calls: MockCallCounts,
}

/// Seedable in-process provider
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    strike_steps: BTreeMap<String, f64>,
    strikes_each_side: u32,
    freshness_threshold: std::time::Duration,
    price_noise: f64,
    spot_jitter: f64,
    days_to_expiry: u32,
    risk_free_rate: f64,
    activity: MockActivity,
    state: Mutex<MockState>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::from_config(&ProviderConfig::default())
    }
}

impl MockProvider {
    pub fn from_config(cfg: &ProviderConfig) -> Self {
        let mock = &cfg.mock;
        let underlyings = mock
            .underlyings
            .iter()
            .map(|u| {
                (
                    u.symbol.clone(),
                    Underlying {
                        spot: u.base_price,
                        volatility: u.volatility,
                    },
                )
            })
            .collect();

        Self {
            name: "mock".to_string(),
            strike_steps: cfg.strike_steps.clone(),
            strikes_each_side: cfg.strikes_each_side,
            freshness_threshold: std::time::Duration::from_secs(cfg.freshness_threshold_seconds),
            price_noise: mock.price_noise,
            spot_jitter: mock.spot_jitter,
            days_to_expiry: mock.days_to_expiry,
            risk_free_rate: config::default_risk_free_rate(),
            activity: mock.activity.into(),
            state: Mutex::new(MockState {
                rng: Pcg64::seed_from_u64(mock.seed),
                scenario: mock.scenario.into(),
                failures: VecDeque::new(),
                underlyings,
                fixed_time: None,
                calls: MockCallCounts::default(),
            }),
        }
    }

    /// Pin the clock used for snapshot timestamps and freshness checks
    pub fn with_fixed_time(self, at: DateTime<Utc>) -> Self {
        self.state.lock().fixed_time = Some(at);
        self
    }

    pub fn with_activity(mut self, activity: MockActivity) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_price_noise(mut self, noise: f64) -> Self {
        self.price_noise = noise;
        self
    }

    pub fn with_spot_jitter(mut self, jitter: f64) -> Self {
        self.spot_jitter = jitter;
        self
    }

    pub fn with_scenario(self, scenario: MockScenario) -> Self {
        self.set_scenario(scenario);
        self
    }

    /// Add or replace an underlying
    pub fn with_underlying(self, symbol: &str, spot: f64, volatility: f64) -> Self {
        self.state
            .lock()
            .underlyings
            .insert(symbol.to_string(), Underlying { spot, volatility });
        self
    }

    pub fn set_scenario(&self, scenario: MockScenario) {
        debug!(?scenario, "Mock scenario set");
        self.state.lock().scenario = scenario;
    }

    pub fn scenario(&self) -> MockScenario {
        self.state.lock().scenario
    }

    pub fn set_time(&self, at: DateTime<Utc>) {
        self.state.lock().fixed_time = Some(at);
    }

    /// Queue a failure for the next fetch call
    pub fn push_failure(&self, failure: ScriptedFailure) {
        self.state.lock().failures.push_back(failure);
    }

    pub fn push_failures(&self, failures: impl IntoIterator<Item = ScriptedFailure>) {
        self.state.lock().failures.extend(failures);
    }

    pub fn pending_failures(&self) -> usize {
        self.state.lock().failures.len()
    }

    pub fn call_counts(&self) -> MockCallCounts {
        self.state.lock().calls
    }

    fn scripted_error(failure: ScriptedFailure, symbol: &str, threshold: std::time::Duration) -> ProviderError {
        match failure {
            ScriptedFailure::ProviderUnavailable => {
                ProviderError::ProviderUnavailable("scripted failure".to_string())
            }
            ScriptedFailure::StaleData => ProviderError::StaleData {
                symbol: symbol.to_string(),
                age: threshold + std::time::Duration::from_secs(1),
                threshold,
            },
            ScriptedFailure::InvalidSymbol => ProviderError::InvalidSymbol(symbol.to_string()),
        }
    }

    /// Common prelude of every fetch: scripted failures, error scenario,
    /// symbol lookup and spot jitter. Returns the current spot and vol.
    fn prepare(&self, state: &mut MockState, symbol: &str) -> ProviderResult<(f64, f64, f64)> {
        if let Some(failure) = state.failures.pop_front() {
            debug!(symbol, ?failure, "Mock returning scripted failure");
            return Err(Self::scripted_error(failure, symbol, self.freshness_threshold));
        }
        if state.scenario == MockScenario::ProviderError {
            return Err(ProviderError::ProviderUnavailable(
                "mock provider error scenario".to_string(),
            ));
        }

        let step = strike_step(&self.strike_steps, symbol)?;
        let jitter = self.spot_jitter;
        let frozen = state.scenario == MockScenario::MarketClosed;

        let MockState {
            rng, underlyings, ..
        } = state;
        let underlying = underlyings
            .get_mut(symbol)
            .ok_or_else(|| ProviderError::InvalidSymbol(symbol.to_string()))?;

        if jitter > 0.0 && !frozen {
            let shock: f64 = rng.gen_range(-1.0..1.0);
            underlying.spot = (underlying.spot * (1.0 + jitter * shock)).max(step);
        }
        Ok((underlying.spot, underlying.volatility, step))
    }

    fn now(state: &MockState) -> DateTime<Utc> {
        state.fixed_time.unwrap_or_else(Utc::now)
    }

    fn round_to_tick(price: f64) -> f64 {
        ((price / TICK).round() * TICK).max(MIN_PRICE)
    }

    fn activity_for(
        &self,
        rng: &mut Pcg64,
        option_type: OptionType,
        strike: f64,
        spot: f64,
    ) -> (u64, u64) {
        match self.activity {
            MockActivity::Fixed {
                call_oi,
                put_oi,
                call_volume,
                put_volume,
            } => match option_type {
                OptionType::Call => (call_oi, call_volume),
                OptionType::Put => (put_oi, put_volume),
            },
            MockActivity::Seeded => {
                let moneyness = (strike - spot).abs() / spot;
                let weight = (1.0 - 3.0 * moneyness).max(0.1);
                let oi: f64 = rng.gen_range(50_000.0..500_000.0);
                let volume: f64 = rng.gen_range(1_000.0..50_000.0);
                ((oi * weight) as u64, (volume * weight) as u64)
            }
        }
    }

    fn build_chain(
        &self,
        state: &mut MockState,
        symbol: &str,
        spot: f64,
        vol: f64,
        step: f64,
    ) -> ProviderResult<OptionChainSnapshot> {
        let now = Self::now(state);
        let scenario = state.scenario;
        let stale_by = chrono::Duration::from_std(self.freshness_threshold)
            .unwrap_or_else(|_| Duration::seconds(60));

        let timestamp = match scenario {
            MockScenario::StaleData => now - stale_by - Duration::seconds(30),
            MockScenario::MarketClosed => now - stale_by - Duration::hours(1),
            _ => now,
        };
        let expiry = timestamp + Duration::days(self.days_to_expiry as i64);
        let atm = atm_strike(spot, step);

        let mut quotes = Vec::new();
        if scenario != MockScenario::EmptyChain {
            let time = self.days_to_expiry as f64 / 365.25;
            for strike in strike_ladder(atm, step, self.strikes_each_side) {
                for option_type in [OptionType::Call, OptionType::Put] {
                    let model = black_scholes_price(BSInputs {
                        spot,
                        strike,
                        time,
                        vol,
                        rate: self.risk_free_rate,
                        option_type,
                    });
                    let noise = if self.price_noise > 0.0 {
                        1.0 + self.price_noise * state.rng.gen_range(-1.0..1.0)
                    } else {
                        1.0
                    };
                    let (open_interest, mut volume) =
                        self.activity_for(&mut state.rng, option_type, strike, spot);
                    if scenario == MockScenario::MarketClosed {
                        volume = 0;
                    }
                    quotes.push(OptionQuote::new(
                        strike,
                        option_type,
                        Self::round_to_tick(model * noise),
                        open_interest,
                        volume,
                    ));
                }
            }
        }

        trace!(symbol, spot, atm, quotes = quotes.len(), "Mock chain generated");
        OptionChainSnapshot::new(symbol, timestamp, spot, expiry, atm, quotes)
            .map_err(|e| ProviderError::ProviderUnavailable(e.to_string()))
    }
}

#[async_trait]
impl DataProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_atm(&self, symbol: &str) -> ProviderResult<f64> {
        let mut state = self.state.lock();
        state.calls.fetch_atm += 1;
        let (spot, _, step) = self.prepare(&mut state, symbol)?;
        Ok(atm_strike(spot, step))
    }

    async fn fetch_overview(&self, symbol: &str) -> ProviderResult<OptionChainSnapshot> {
        let mut state = self.state.lock();
        state.calls.fetch_overview += 1;
        let (spot, vol, step) = self.prepare(&mut state, symbol)?;
        let snapshot = self.build_chain(&mut state, symbol, spot, vol, step)?;
        check_freshness(&snapshot, Self::now(&state), self.freshness_threshold)?;
        Ok(snapshot)
    }

    async fn check_health(&self) -> HealthReport {
        let mut state = self.state.lock();
        state.calls.check_health += 1;
        let now = Self::now(&state);

        match state.scenario {
            MockScenario::ProviderError => {
                let mut report = HealthReport::unhealthy(&self.name, "mock provider error scenario");
                report.last_failure_time = Some(now);
                report
            }
            MockScenario::StaleData | MockScenario::MarketClosed => HealthReport {
                status: HealthStatus::Degraded,
                last_error: Some("quotes are older than the freshness threshold".to_string()),
                ..HealthReport::new(&self.name)
            },
            MockScenario::Normal | MockScenario::EmptyChain => HealthReport {
                last_success_time: Some(now),
                ..HealthReport::new(&self.name)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, 6, 0, 0).unwrap()
    }

    fn mock() -> MockProvider {
        MockProvider::default().with_fixed_time(at())
    }

    #[tokio::test]
    async fn test_atm_uses_strike_step() {
        let provider = mock();
        assert_eq!(provider.fetch_atm("NIFTY").await.unwrap(), 24800.0);
        assert_eq!(provider.fetch_atm("BANKNIFTY").await.unwrap(), 54000.0);
        assert_eq!(provider.fetch_atm("MIDCPNIFTY").await.unwrap(), 12800.0);
    }

    #[tokio::test]
    async fn test_overview_shape() {
        let provider = mock();
        let snapshot = provider.fetch_overview("NIFTY").await.unwrap();

        assert_eq!(snapshot.atm_strike(), 24800.0);
        assert_eq!(
            snapshot.strikes(),
            vec![24700.0, 24750.0, 24800.0, 24850.0, 24900.0]
        );
        assert_eq!(snapshot.quotes().len(), 10);
        assert_eq!(snapshot.timestamp(), at());
        assert!(snapshot.quotes().iter().all(|q| q.last_price >= MIN_PRICE));
    }

    #[tokio::test]
    async fn test_same_seed_same_data() {
        let a = mock().fetch_overview("NIFTY").await.unwrap();
        let b = mock().fetch_overview("NIFTY").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_fixed_activity() {
        let provider = mock().with_activity(MockActivity::Fixed {
            call_oi: 100_000,
            put_oi: 120_000,
            call_volume: 5_000,
            put_volume: 6_000,
        });
        let snapshot = provider.fetch_overview("NIFTY").await.unwrap();
        for quote in snapshot.quotes() {
            match quote.option_type {
                OptionType::Call => assert_eq!((quote.open_interest, quote.volume), (100_000, 5_000)),
                OptionType::Put => assert_eq!((quote.open_interest, quote.volume), (120_000, 6_000)),
            }
        }
    }

    #[tokio::test]
    async fn test_scripted_failures_consumed_in_order() {
        let provider = mock();
        provider.push_failures([
            ScriptedFailure::ProviderUnavailable,
            ScriptedFailure::StaleData,
            ScriptedFailure::InvalidSymbol,
        ]);

        assert_matches!(
            provider.fetch_atm("NIFTY").await,
            Err(ProviderError::ProviderUnavailable(_))
        );
        assert_matches!(
            provider.fetch_overview("NIFTY").await,
            Err(ProviderError::StaleData { .. })
        );
        assert_matches!(
            provider.fetch_atm("NIFTY").await,
            Err(ProviderError::InvalidSymbol(_))
        );
        assert!(provider.fetch_atm("NIFTY").await.is_ok());
        assert_eq!(provider.pending_failures(), 0);

        let calls = provider.call_counts();
        assert_eq!(calls.fetch_atm, 3);
        assert_eq!(calls.fetch_overview, 1);
    }

    #[tokio::test]
    async fn test_unknown_symbol() {
        assert_matches!(
            mock().fetch_atm("SENSEX").await,
            Err(ProviderError::InvalidSymbol(s)) if s == "SENSEX"
        );
    }

    #[tokio::test]
    async fn test_market_closed_is_stale() {
        let provider = mock().with_scenario(MockScenario::MarketClosed);
        assert!(provider.fetch_atm("NIFTY").await.is_ok());
        assert_matches!(
            provider.fetch_overview("NIFTY").await,
            Err(ProviderError::StaleData { .. })
        );
    }

    #[tokio::test]
    async fn test_stale_and_error_scenarios() {
        let provider = mock().with_scenario(MockScenario::StaleData);
        assert_matches!(
            provider.fetch_overview("NIFTY").await,
            Err(ProviderError::StaleData { .. })
        );

        provider.set_scenario(MockScenario::ProviderError);
        assert_matches!(
            provider.fetch_atm("NIFTY").await,
            Err(ProviderError::ProviderUnavailable(_))
        );
        assert_eq!(provider.check_health().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let provider = mock().with_scenario(MockScenario::EmptyChain);
        let snapshot = provider.fetch_overview("NIFTY").await.unwrap();
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.atm_strike(), 24800.0);
    }

    #[tokio::test]
    async fn test_health_normal_scenario() {
        let report = mock().check_health().await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.component, "mock");
        assert_eq!(report.last_success_time, Some(at()));
    }

    #[tokio::test]
    async fn test_spot_jitter_moves_spot() {
        let provider = mock().with_spot_jitter(0.01);
        let first = provider.fetch_overview("NIFTY").await.unwrap().spot();
        let second = provider.fetch_overview("NIFTY").await.unwrap().spot();
        assert_ne!(first, second);
        assert!((first / 24800.0 - 1.0).abs() <= 0.01 + 1e-12);
    }
}
