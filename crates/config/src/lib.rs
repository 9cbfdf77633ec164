use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root configuration loaded from `g6_config.yaml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct G6Config {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlatformConfig {
    #[serde(default = "default_platform_name")]
    pub name: String,
    #[serde(default = "default_platform_version")]
    pub version: String,
    /// Underlyings collected on every tick
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            name: default_platform_name(),
            version: default_platform_version(),
            symbols: default_symbols(),
        }
    }
}

/// Exchange trading calendar.
///
/// Times are `HH:MM` in exchange local time, where local time is UTC plus
/// `utc_offset_minutes`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarConfig {
    #[serde(default = "default_exchange")]
    pub exchange: String,
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<String>,
    #[serde(default = "default_session_start")]
    pub session_start: String,
    #[serde(default = "default_session_end")]
    pub session_end: String,
    #[serde(default = "default_pre_open_start")]
    pub pre_open_start: Option<String>,
    #[serde(default = "default_post_close_end")]
    pub post_close_end: Option<String>,
    #[serde(default)]
    pub holidays: Vec<HolidayEntry>,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            utc_offset_minutes: default_utc_offset_minutes(),
            trading_days: default_trading_days(),
            session_start: default_session_start(),
            session_end: default_session_end(),
            pre_open_start: default_pre_open_start(),
            post_close_end: default_post_close_end(),
            holidays: Vec::new(),
        }
    }
}

/// Holiday date (`YYYY-MM-DD`) with an optional description
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HolidayEntry {
    pub date: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    Mock,
    Live,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Mock => write!(f, "mock"),
            ProviderKind::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Upper bound on every provider call made by the scheduler
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overviews older than this are rejected as stale
    #[serde(default = "default_freshness_threshold_seconds")]
    pub freshness_threshold_seconds: u64,
    #[serde(default = "default_strikes_each_side")]
    pub strikes_each_side: u32,
    #[serde(default = "default_strike_steps")]
    pub strike_steps: BTreeMap<String, f64>,
    #[serde(default)]
    pub mock: MockProviderConfig,
    #[serde(default)]
    pub live: Option<LiveProviderConfig>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::default(),
            timeout_ms: default_timeout_ms(),
            freshness_threshold_seconds: default_freshness_threshold_seconds(),
            strikes_each_side: default_strikes_each_side(),
            strike_steps: default_strike_steps(),
            mock: MockProviderConfig::default(),
            live: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MockScenarioConfig {
    #[default]
    Normal,
    MarketClosed,
    StaleData,
    ProviderError,
    EmptyChain,
}

/// How the mock fills open interest and volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum MockActivityConfig {
    #[default]
    Seeded,
    Fixed {
        call_oi: u64,
        put_oi: u64,
        call_volume: u64,
        put_volume: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MockUnderlying {
    pub symbol: String,
    pub base_price: f64,
    pub volatility: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MockProviderConfig {
    #[serde(default = "default_mock_seed")]
    pub seed: u64,
    #[serde(default)]
    pub scenario: MockScenarioConfig,
    /// Relative noise applied to model prices (0.05 = 5%)
    #[serde(default = "default_price_noise")]
    pub price_noise: f64,
    /// Relative random walk applied to spot on every fetch
    #[serde(default)]
    pub spot_jitter: f64,
    #[serde(default = "default_days_to_expiry")]
    pub days_to_expiry: u32,
    #[serde(default)]
    pub activity: MockActivityConfig,
    #[serde(default = "default_mock_underlyings")]
    pub underlyings: Vec<MockUnderlying>,
}

impl Default for MockProviderConfig {
    fn default() -> Self {
        Self {
            seed: default_mock_seed(),
            scenario: MockScenarioConfig::default(),
            price_noise: default_price_noise(),
            spot_jitter: 0.0,
            days_to_expiry: default_days_to_expiry(),
            activity: MockActivityConfig::default(),
            underlyings: default_mock_underlyings(),
        }
    }
}

/// Kite-style REST provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LiveProviderConfig {
    #[serde(default = "default_live_base_url")]
    pub base_url: String,
    pub api_key: String,
    pub access_token: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: f64,
    #[serde(default = "default_max_transport_retries")]
    pub max_retries: u32,
    #[serde(default = "default_transport_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_expiry_weekday")]
    pub expiry_weekday: String,
    #[serde(default = "default_derivatives_exchange")]
    pub derivatives_exchange: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    /// Retries allowed per cycle; a budget of N allows N + 1 attempts
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_status_log_interval_seconds")]
    pub status_log_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            retry_budget: default_retry_budget(),
            initial_backoff_ms: default_initial_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            channel_capacity: default_channel_capacity(),
            status_log_interval_seconds: default_status_log_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_iv_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_initial_guess")]
    pub initial_guess: f64,
    #[serde(default = "default_min_volatility")]
    pub min_volatility: f64,
    #[serde(default = "default_max_volatility")]
    pub max_volatility: f64,
    #[serde(default = "default_compute_greeks")]
    pub compute_greeks: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            tolerance: default_iv_tolerance(),
            max_iterations: default_max_iterations(),
            initial_guess: default_initial_guess(),
            min_volatility: default_min_volatility(),
            max_volatility: default_max_volatility(),
            compute_greeks: default_compute_greeks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_degraded_after")]
    pub degraded_after: u32,
    #[serde(default = "default_unhealthy_after")]
    pub unhealthy_after: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_after: default_degraded_after(),
            unhealthy_after: default_unhealthy_after(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// pretty | json | compact
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Start the Prometheus HTTP listener
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: default_log_format(),
            log_level: default_log_level(),
            metrics_enabled: false,
            metrics_port: default_metrics_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_config() {
        let yaml = include_str!("../../../g6_config/g6_config.yaml");
        let config: G6Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.platform.name, "G6 Options Collector");
        assert_eq!(
            config.platform.symbols,
            vec!["NIFTY", "BANKNIFTY", "FINNIFTY", "MIDCPNIFTY"]
        );

        assert_eq!(config.calendar.exchange, "NSE");
        assert_eq!(config.calendar.utc_offset_minutes, 330);
        assert_eq!(config.calendar.session_start, "09:15");
        assert_eq!(config.calendar.session_end, "15:30");
        assert!(!config.calendar.holidays.is_empty());

        assert_eq!(config.provider.kind, ProviderKind::Mock);
        assert_eq!(config.provider.strike_steps.get("MIDCPNIFTY"), Some(&25.0));
        assert_eq!(config.provider.mock.seed, 12345);
        assert!(config.provider.live.is_some());

        assert_eq!(config.scheduler.retry_budget, 2);
        assert_eq!(config.analytics.risk_free_rate, 0.06);
        assert_eq!(config.health.unhealthy_after, 3);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: G6Config = serde_yaml::from_str("platform:\n  symbols: [NIFTY]\n").unwrap();

        assert_eq!(config.platform.symbols, vec!["NIFTY"]);
        assert_eq!(config.platform.version, "1.0.0");
        assert_eq!(config.calendar.trading_days.len(), 5);
        assert_eq!(config.provider.timeout_ms, 5000);
        assert_eq!(config.provider.strikes_each_side, 2);
        assert_eq!(config.analytics.max_iterations, 100);
        assert_eq!(config.analytics.initial_guess, 0.2);
        assert_eq!(config.health.degraded_after, 1);
        assert!(config.provider.live.is_none());
    }

    #[test]
    fn test_fixed_activity_is_tagged() {
        let yaml = r#"
provider:
  mock:
    activity:
      mode: fixed
      call_oi: 100000
      put_oi: 120000
      call_volume: 5000
      put_volume: 4000
"#;
        let config: G6Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.provider.mock.activity,
            MockActivityConfig::Fixed {
                call_oi: 100000,
                put_oi: 120000,
                call_volume: 5000,
                put_volume: 4000,
            }
        );
    }
}
