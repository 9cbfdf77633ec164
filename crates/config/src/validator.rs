use crate::*;
use chrono::{NaiveDate, NaiveTime, Weekday};
use regex::Regex;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Platform name is required")]
    MissingPlatformName,

    #[error("Invalid version format: {0}. Must be in format X.Y.Z (e.g., 1.0.0)")]
    InvalidVersionFormat(String),

    #[error("No symbols configured for collection")]
    NoSymbols,

    #[error("Symbol '{0}' is listed more than once")]
    DuplicateSymbol(String),

    #[error("Symbol '{symbol}': {message}")]
    InvalidSymbol { symbol: String, message: String },

    #[error("Exchange name is required")]
    MissingExchangeName,

    #[error("UTC offset must be within -720..=840 minutes, got: {0}")]
    InvalidUtcOffset(i32),

    #[error("At least one trading day is required")]
    NoTradingDays,

    #[error("Invalid trading day '{0}'. Use mon, tue, wed, thu, fri, sat or sun")]
    InvalidTradingDay(String),

    #[error("Invalid time format '{time}' for {field}: expected HH:MM")]
    InvalidTimeFormat { field: String, time: String },

    #[error("Calendar: {message}")]
    InvalidSession { message: String },

    #[error("Invalid holiday date '{0}': expected YYYY-MM-DD")]
    InvalidHolidayDate(String),

    #[error("Provider: {message}")]
    InvalidProvider { message: String },

    #[error("Live provider configuration is required when provider kind is live")]
    MissingLiveProvider,

    #[error("Live provider: {message}")]
    InvalidLiveProvider { message: String },

    #[error("Environment variable '{var}' is missing or invalid: {message}")]
    InvalidEnvVar { var: String, message: String },

    #[error("Scheduler: {message}")]
    InvalidScheduler { message: String },

    #[error("Analytics: {message}")]
    InvalidAnalytics { message: String },

    #[error("Health: {message}")]
    InvalidHealth { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a positive float")]
    InvalidPositiveFloat { field: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &G6Config) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_platform(&config.platform, &mut report);
    validate_calendar(&config.calendar, &mut report);
    validate_provider(&config.provider, &config.platform, &mut report);
    validate_scheduler(&config.scheduler, &mut report);
    validate_analytics(&config.analytics, &mut report);
    validate_health(&config.health, &mut report);
    validate_observability(&config.observability, &mut report);

    report
}

/// Parse an `HH:MM` time of day
pub fn parse_time_of_day(value: &str) -> Option<NaiveTime> {
    let time_regex = Regex::new(r"^([0-1]?[0-9]|2[0-3]):[0-5][0-9]$").ok()?;
    if !time_regex.is_match(value) {
        return None;
    }
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

/// Parse a weekday name (`mon`, `Monday`, ...)
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

/// Parse a `YYYY-MM-DD` holiday date
pub fn parse_holiday_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

fn validate_platform(platform: &PlatformConfig, report: &mut ValidationReport) {
    if platform.name.is_empty() {
        report.add_error(ValidationError::MissingPlatformName);
    }

    let version_ok = Regex::new(r"^\d+\.\d+\.\d+$")
        .map(|re| re.is_match(&platform.version))
        .unwrap_or(false);
    if !version_ok {
        report.add_error(ValidationError::InvalidVersionFormat(
            platform.version.clone(),
        ));
    }

    if platform.symbols.is_empty() {
        report.add_error(ValidationError::NoSymbols);
        return;
    }

    let mut seen = BTreeSet::new();
    for symbol in &platform.symbols {
        if symbol.trim().is_empty() {
            report.add_error(ValidationError::InvalidSymbol {
                symbol: symbol.clone(),
                message: "Symbol must not be empty".to_string(),
            });
            continue;
        }
        if symbol.chars().any(|c| !c.is_ascii_alphanumeric()) {
            report.add_error(ValidationError::InvalidSymbol {
                symbol: symbol.clone(),
                message: "Symbol must be alphanumeric".to_string(),
            });
        }
        if !seen.insert(symbol.to_uppercase()) {
            report.add_error(ValidationError::DuplicateSymbol(symbol.clone()));
        }
    }
}

fn validate_calendar(calendar: &CalendarConfig, report: &mut ValidationReport) {
    if calendar.exchange.is_empty() {
        report.add_error(ValidationError::MissingExchangeName);
    }

    if !(-720..=840).contains(&calendar.utc_offset_minutes) {
        report.add_error(ValidationError::InvalidUtcOffset(
            calendar.utc_offset_minutes,
        ));
    }

    if calendar.trading_days.is_empty() {
        report.add_error(ValidationError::NoTradingDays);
    }
    for day in &calendar.trading_days {
        if parse_weekday(day).is_none() {
            report.add_error(ValidationError::InvalidTradingDay(day.clone()));
        }
    }

    let start = check_time(report, "calendar.session_start", &calendar.session_start);
    let end = check_time(report, "calendar.session_end", &calendar.session_end);
    let pre_open = calendar
        .pre_open_start
        .as_deref()
        .and_then(|t| check_time(report, "calendar.pre_open_start", t));
    let post_close = calendar
        .post_close_end
        .as_deref()
        .and_then(|t| check_time(report, "calendar.post_close_end", t));

    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            report.add_error(ValidationError::InvalidSession {
                message: format!(
                    "session_start ({}) must be before session_end ({})",
                    calendar.session_start, calendar.session_end
                ),
            });
        }
        if let Some(pre) = pre_open {
            if pre > start {
                report.add_error(ValidationError::InvalidSession {
                    message: "pre_open_start must not be after session_start".to_string(),
                });
            }
        }
        if let Some(post) = post_close {
            if post < end {
                report.add_error(ValidationError::InvalidSession {
                    message: "post_close_end must not be before session_end".to_string(),
                });
            }
        }
    }

    let mut holiday_dates = BTreeSet::new();
    for holiday in &calendar.holidays {
        match parse_holiday_date(&holiday.date) {
            Some(date) => {
                if !holiday_dates.insert(date) {
                    report.add_warning(
                        "calendar.holidays",
                        &format!("Holiday {} is listed more than once", holiday.date),
                    );
                }
            }
            None => report.add_error(ValidationError::InvalidHolidayDate(holiday.date.clone())),
        }
    }

    if calendar.holidays.is_empty() {
        report.add_warning(
            "calendar.holidays",
            "No holidays configured; every trading weekday is treated as a session day",
        );
    }
}

fn check_time(report: &mut ValidationReport, field: &str, value: &str) -> Option<NaiveTime> {
    let parsed = parse_time_of_day(value);
    if parsed.is_none() {
        report.add_error(ValidationError::InvalidTimeFormat {
            field: field.to_string(),
            time: value.to_string(),
        });
    }
    parsed
}

fn validate_provider(
    provider: &ProviderConfig,
    platform: &PlatformConfig,
    report: &mut ValidationReport,
) {
    if provider.timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.timeout_ms".to_string(),
        });
    }
    if provider.freshness_threshold_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.freshness_threshold_seconds".to_string(),
        });
    }
    if provider.strikes_each_side > 50 {
        report.add_error(ValidationError::InvalidProvider {
            message: format!(
                "strikes_each_side must be at most 50, got: {}",
                provider.strikes_each_side
            ),
        });
    }

    for (symbol, step) in &provider.strike_steps {
        if !step.is_finite() || *step <= 0.0 {
            report.add_error(ValidationError::InvalidSymbol {
                symbol: symbol.clone(),
                message: format!("strike step must be positive, got: {}", step),
            });
        }
    }
    for symbol in &platform.symbols {
        if !provider.strike_steps.contains_key(symbol) {
            report.add_error(ValidationError::InvalidSymbol {
                symbol: symbol.clone(),
                message: "no strike step configured".to_string(),
            });
        }
    }

    validate_mock(&provider.mock, platform, provider.kind, report);

    match (&provider.live, provider.kind) {
        (Some(live), _) => validate_live(live, provider.kind, report),
        (None, ProviderKind::Live) => report.add_error(ValidationError::MissingLiveProvider),
        (None, ProviderKind::Mock) => {}
    }
}

fn validate_mock(
    mock: &MockProviderConfig,
    platform: &PlatformConfig,
    kind: ProviderKind,
    report: &mut ValidationReport,
) {
    if !(0.0..1.0).contains(&mock.price_noise) {
        report.add_error(ValidationError::InvalidProvider {
            message: format!("mock.price_noise must be in [0, 1), got: {}", mock.price_noise),
        });
    }
    if !(0.0..1.0).contains(&mock.spot_jitter) {
        report.add_error(ValidationError::InvalidProvider {
            message: format!("mock.spot_jitter must be in [0, 1), got: {}", mock.spot_jitter),
        });
    }
    if mock.days_to_expiry == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.mock.days_to_expiry".to_string(),
        });
    }

    for underlying in &mock.underlyings {
        if !underlying.base_price.is_finite() || underlying.base_price <= 0.0 {
            report.add_error(ValidationError::InvalidPositiveFloat {
                field: format!("provider.mock.underlyings.{}.base_price", underlying.symbol),
            });
        }
        if !underlying.volatility.is_finite() || underlying.volatility <= 0.0 {
            report.add_error(ValidationError::InvalidPositiveFloat {
                field: format!("provider.mock.underlyings.{}.volatility", underlying.symbol),
            });
        }
    }

    if kind == ProviderKind::Mock {
        for symbol in &platform.symbols {
            if !mock.underlyings.iter().any(|u| &u.symbol == symbol) {
                report.add_warning(
                    "provider.mock.underlyings",
                    &format!("{} has no mock underlying; its cycles will fault", symbol),
                );
            }
        }
        if mock.scenario != MockScenarioConfig::Normal {
            report.add_warning(
                "provider.mock.scenario",
                &format!("Mock provider starts in the {:?} scenario", mock.scenario),
            );
        }
    }
}

fn validate_live(live: &LiveProviderConfig, kind: ProviderKind, report: &mut ValidationReport) {
    match url::Url::parse(&live.base_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {
            if parsed.scheme() == "http" {
                report.add_warning("provider.live.base_url", "Live endpoint is not using TLS");
            }
        }
        Ok(parsed) => report.add_error(ValidationError::InvalidLiveProvider {
            message: format!("unsupported URL scheme '{}'", parsed.scheme()),
        }),
        Err(e) => report.add_error(ValidationError::InvalidLiveProvider {
            message: format!("invalid base_url '{}': {}", live.base_url, e),
        }),
    }

    // Credentials only matter when the live provider is selected
    if kind == ProviderKind::Live {
        for (var, value) in [("api_key", &live.api_key), ("access_token", &live.access_token)] {
            if value.trim().is_empty() {
                report.add_error(ValidationError::InvalidLiveProvider {
                    message: format!("{} is required", var),
                });
            } else if has_unresolved_env_vars(value) {
                report.add_error(ValidationError::InvalidEnvVar {
                    var: value.clone(),
                    message: format!("provider.live.{} references an unset variable", var),
                });
            }
        }
    }

    if !live.requests_per_second.is_finite() || live.requests_per_second <= 0.0 {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "provider.live.requests_per_second".to_string(),
        });
    }
    if live.max_retries > 10 {
        report.add_error(ValidationError::InvalidLiveProvider {
            message: format!("max_retries must be at most 10, got: {}", live.max_retries),
        });
    }
    if live.initial_backoff_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "provider.live.initial_backoff_ms".to_string(),
        });
    }
    if parse_weekday(&live.expiry_weekday).is_none() {
        report.add_error(ValidationError::InvalidLiveProvider {
            message: format!("invalid expiry_weekday '{}'", live.expiry_weekday),
        });
    }
    if live.derivatives_exchange.is_empty() {
        report.add_error(ValidationError::InvalidLiveProvider {
            message: "derivatives_exchange is required".to_string(),
        });
    }
}

fn validate_scheduler(scheduler: &SchedulerConfig, report: &mut ValidationReport) {
    if scheduler.interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "scheduler.interval_seconds".to_string(),
        });
    }
    if scheduler.retry_budget > 20 {
        report.add_error(ValidationError::InvalidScheduler {
            message: format!("retry_budget must be at most 20, got: {}", scheduler.retry_budget),
        });
    }
    if scheduler.retry_budget == 0 {
        report.add_warning(
            "scheduler.retry_budget",
            "Retry budget is 0; every transient provider failure faults its cycle",
        );
    }
    if !scheduler.backoff_multiplier.is_finite() || scheduler.backoff_multiplier < 1.0 {
        report.add_error(ValidationError::InvalidScheduler {
            message: format!(
                "backoff_multiplier must be >= 1.0, got: {}",
                scheduler.backoff_multiplier
            ),
        });
    }
    if scheduler.max_backoff_ms < scheduler.initial_backoff_ms {
        report.add_error(ValidationError::InvalidScheduler {
            message: "max_backoff_ms must not be below initial_backoff_ms".to_string(),
        });
    }
    if scheduler.channel_capacity == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "scheduler.channel_capacity".to_string(),
        });
    }
    if scheduler.status_log_interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "scheduler.status_log_interval_seconds".to_string(),
        });
    }
}

fn validate_analytics(analytics: &AnalyticsConfig, report: &mut ValidationReport) {
    if !analytics.risk_free_rate.is_finite() || !(-0.1..=1.0).contains(&analytics.risk_free_rate) {
        report.add_error(ValidationError::InvalidAnalytics {
            message: format!(
                "risk_free_rate must be within [-0.1, 1.0], got: {}",
                analytics.risk_free_rate
            ),
        });
    }
    if !analytics.tolerance.is_finite() || analytics.tolerance <= 0.0 {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "analytics.tolerance".to_string(),
        });
    }
    if analytics.max_iterations == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "analytics.max_iterations".to_string(),
        });
    }
    if analytics.min_volatility < VOLATILITY_FLOOR
        || analytics.max_volatility > VOLATILITY_CEILING
        || analytics.min_volatility >= analytics.max_volatility
    {
        report.add_error(ValidationError::InvalidAnalytics {
            message: format!(
                "volatility bounds must satisfy {} <= min < max <= {}, got: [{}, {}]",
                VOLATILITY_FLOOR,
                VOLATILITY_CEILING,
                analytics.min_volatility,
                analytics.max_volatility
            ),
        });
    } else if !(analytics.min_volatility..=analytics.max_volatility)
        .contains(&analytics.initial_guess)
    {
        report.add_error(ValidationError::InvalidAnalytics {
            message: format!(
                "initial_guess {} is outside the volatility bounds",
                analytics.initial_guess
            ),
        });
    }
}

fn validate_health(health: &HealthConfig, report: &mut ValidationReport) {
    if health.degraded_after == 0 {
        report.add_error(ValidationError::InvalidHealth {
            message: "degraded_after must be at least 1".to_string(),
        });
    }
    if health.unhealthy_after < health.degraded_after {
        report.add_error(ValidationError::InvalidHealth {
            message: format!(
                "unhealthy_after ({}) must not be below degraded_after ({})",
                health.unhealthy_after, health.degraded_after
            ),
        });
    }
}

fn validate_observability(observability: &ObservabilityConfig, report: &mut ValidationReport) {
    let valid_formats = ["pretty", "json", "compact"];
    if !valid_formats.contains(&observability.log_format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(
            observability.log_format.clone(),
        ));
    }
    if observability.metrics_enabled && observability.metrics_port == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "observability.metrics_port".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> G6Config {
        let mut config = G6Config::default();
        config.calendar.holidays = vec![HolidayEntry {
            date: "2025-10-02".to_string(),
            name: Some("Gandhi Jayanti".to_string()),
        }];
        config
    }

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_config(&valid_config());
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
    }

    #[test]
    fn test_generated_config_is_valid_with_mock() {
        let report = validate_config(&generate_default_config());
        assert!(report.is_valid(), "unexpected errors: {:?}", report.errors);
    }

    #[test]
    fn test_duplicate_symbols_rejected() {
        let mut config = valid_config();
        config.platform.symbols = vec!["NIFTY".to_string(), "NIFTY".to_string()];
        let report = validate_config(&config);
        assert!(report
            .errors
            .contains(&ValidationError::DuplicateSymbol("NIFTY".to_string())));
    }

    #[test]
    fn test_bad_session_times_rejected() {
        let mut config = valid_config();
        config.calendar.session_start = "9.15".to_string();
        config.calendar.session_end = "25:00".to_string();
        let report = validate_config(&config);
        let time_errors = report
            .errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidTimeFormat { .. }))
            .count();
        assert_eq!(time_errors, 2);
    }

    #[test]
    fn test_session_start_must_precede_end() {
        let mut config = valid_config();
        config.calendar.session_start = "15:30".to_string();
        config.calendar.session_end = "09:15".to_string();
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidSession { .. })));
    }

    #[test]
    fn test_bad_holiday_rejected() {
        let mut config = valid_config();
        config.calendar.holidays.push(HolidayEntry {
            date: "2025-13-40".to_string(),
            name: None,
        });
        let report = validate_config(&config);
        assert!(report
            .errors
            .contains(&ValidationError::InvalidHolidayDate("2025-13-40".to_string())));
    }

    #[test]
    fn test_live_kind_requires_live_section() {
        let mut config = valid_config();
        config.provider.kind = ProviderKind::Live;
        let report = validate_config(&config);
        assert!(report.errors.contains(&ValidationError::MissingLiveProvider));
    }

    #[test]
    fn test_live_credentials_and_url_checked() {
        let mut config = generate_default_config();
        config.provider.kind = ProviderKind::Live;
        if let Some(live) = config.provider.live.as_mut() {
            live.base_url = "not a url".to_string();
            live.api_key = String::new();
            live.access_token = "${G6_VALIDATOR_UNSET_TOKEN}".to_string();
        }
        let report = validate_config(&config);

        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::InvalidLiveProvider { message } if message.contains("base_url")
        )));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::InvalidLiveProvider { message } if message.contains("api_key")
        )));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidEnvVar { .. })));
    }

    #[test]
    fn test_health_thresholds_checked() {
        let mut config = valid_config();
        config.health.degraded_after = 3;
        config.health.unhealthy_after = 2;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidHealth { .. })));
    }

    #[test]
    fn test_numeric_ranges_checked() {
        let mut config = valid_config();
        config.scheduler.interval_seconds = 0;
        config.scheduler.backoff_multiplier = 0.5;
        config.analytics.max_iterations = 0;
        config.analytics.min_volatility = 6.0;
        config.observability.log_format = "xml".to_string();
        let report = validate_config(&config);
        assert_eq!(report.errors.len(), 5, "errors: {:?}", report.errors);
    }

    #[test]
    fn test_volatility_bracket_limited_to_solver_range() {
        let mut config = valid_config();
        config.analytics.max_volatility = 8.0;
        assert!(!validate_config(&config).is_valid());

        let mut config = valid_config();
        config.analytics.min_volatility = 0.001;
        assert!(!validate_config(&config).is_valid());

        let mut config = valid_config();
        config.analytics.min_volatility = 0.05;
        config.analytics.max_volatility = 3.0;
        assert!(validate_config(&config).is_valid());
    }

    #[test]
    fn test_zero_retry_budget_warns() {
        let mut config = valid_config();
        config.scheduler.retry_budget = 0;
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "scheduler.retry_budget"));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_weekday("Thursday"), Some(Weekday::Thu));
        assert_eq!(parse_weekday("thu"), Some(Weekday::Thu));
        assert!(parse_weekday("someday").is_none());
        assert!(parse_time_of_day("09:15").is_some());
        assert!(parse_time_of_day("9:5").is_none());
        assert!(parse_holiday_date("2025-01-26").is_some());
    }
}
