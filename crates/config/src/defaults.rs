use std::collections::BTreeMap;

// Platform defaults
pub fn default_platform_name() -> String {
    "G6 Options Collector".to_string()
}

pub fn default_platform_version() -> String {
    "1.0.0".to_string()
}

pub fn default_symbols() -> Vec<String> {
    vec!["NIFTY".to_string(), "BANKNIFTY".to_string()]
}

// Calendar defaults (NSE)
pub fn default_exchange() -> String {
    "NSE".to_string()
}

pub fn default_utc_offset_minutes() -> i32 {
    330
}

pub fn default_trading_days() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

pub fn default_session_start() -> String {
    "09:15".to_string()
}

pub fn default_session_end() -> String {
    "15:30".to_string()
}

pub fn default_pre_open_start() -> Option<String> {
    Some("09:00".to_string())
}

pub fn default_post_close_end() -> Option<String> {
    Some("16:00".to_string())
}

// Provider defaults
pub fn default_timeout_ms() -> u64 {
    5000
}

pub fn default_freshness_threshold_seconds() -> u64 {
    60
}

pub fn default_strikes_each_side() -> u32 {
    2
}

pub fn default_strike_steps() -> BTreeMap<String, f64> {
    let mut steps = BTreeMap::new();
    steps.insert("NIFTY".to_string(), 50.0);
    steps.insert("BANKNIFTY".to_string(), 100.0);
    steps.insert("FINNIFTY".to_string(), 50.0);
    steps.insert("MIDCPNIFTY".to_string(), 25.0);
    steps
}

pub fn default_mock_seed() -> u64 {
    12345
}

pub fn default_price_noise() -> f64 {
    0.05
}

pub fn default_days_to_expiry() -> u32 {
    7
}

pub fn default_mock_underlyings() -> Vec<super::MockUnderlying> {
    [
        ("NIFTY", 24800.0, 0.18),
        ("BANKNIFTY", 54000.0, 0.22),
        ("FINNIFTY", 22500.0, 0.20),
        ("MIDCPNIFTY", 12800.0, 0.25),
    ]
    .iter()
    .map(|(symbol, base_price, volatility)| super::MockUnderlying {
        symbol: symbol.to_string(),
        base_price: *base_price,
        volatility: *volatility,
    })
    .collect()
}

pub fn default_live_base_url() -> String {
    "https://api.kite.trade".to_string()
}

pub fn default_requests_per_second() -> f64 {
    3.0
}

pub fn default_max_transport_retries() -> u32 {
    3
}

pub fn default_transport_backoff_ms() -> u64 {
    500
}

pub fn default_expiry_weekday() -> String {
    "thu".to_string()
}

pub fn default_derivatives_exchange() -> String {
    "NFO".to_string()
}

// Scheduler defaults
pub fn default_interval_seconds() -> u64 {
    60
}

pub fn default_retry_budget() -> u32 {
    2
}

pub fn default_initial_backoff_ms() -> u64 {
    500
}

pub fn default_backoff_multiplier() -> f64 {
    2.0
}

pub fn default_max_backoff_ms() -> u64 {
    10_000
}

pub fn default_shutdown_grace_seconds() -> u64 {
    10
}

pub fn default_channel_capacity() -> usize {
    256
}

pub fn default_status_log_interval_seconds() -> u64 {
    300
}

// Analytics defaults
pub fn default_risk_free_rate() -> f64 {
    0.06
}

pub fn default_iv_tolerance() -> f64 {
    1e-6
}

pub fn default_max_iterations() -> u32 {
    100
}

pub fn default_initial_guess() -> f64 {
    0.2
}

/// Widest volatility bracket the IV solver can price
pub const VOLATILITY_FLOOR: f64 = 0.01;
pub const VOLATILITY_CEILING: f64 = 5.0;

pub fn default_min_volatility() -> f64 {
    VOLATILITY_FLOOR
}

pub fn default_max_volatility() -> f64 {
    VOLATILITY_CEILING
}

pub fn default_compute_greeks() -> bool {
    true
}

// Health defaults
pub fn default_degraded_after() -> u32 {
    1
}

pub fn default_unhealthy_after() -> u32 {
    3
}

// Observability defaults
pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}

pub fn default_enabled() -> bool {
    true
}
