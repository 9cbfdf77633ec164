//! Common types used across G6
//!
//! This module provides the fundamental domain types shared by the
//! provider, analytics, health and collection crates.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Strikes closer than this are considered the same strike
pub const STRIKE_EPSILON: f64 = 1e-9;

/// Option type (call or put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    /// Call option
    Call,
    /// Put option
    Put,
}

impl OptionType {
    /// Exchange suffix used in trading symbols (CE/PE)
    pub fn suffix(&self) -> &'static str {
        match self {
            OptionType::Call => "CE",
            OptionType::Put => "PE",
        }
    }

    /// Returns true if this is a call
    pub fn is_call(&self) -> bool {
        matches!(self, OptionType::Call)
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

/// A single quoted option leg in a chain
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub option_type: OptionType,
    pub last_price: f64,
    pub open_interest: u64,
    pub volume: u64,
}

impl OptionQuote {
    pub fn new(
        strike: f64,
        option_type: OptionType,
        last_price: f64,
        open_interest: u64,
        volume: u64,
    ) -> Self {
        Self {
            strike,
            option_type,
            last_price,
            open_interest,
            volume,
        }
    }

    fn ordering(&self, other: &Self) -> Ordering {
        self.strike
            .total_cmp(&other.strike)
            .then(self.option_type.cmp(&other.option_type))
    }
}

/// Identifies a snapshot without owning it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotKey {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timestamp.to_rfc3339())
    }
}

/// Immutable option chain snapshot for one underlying at one instant.
///
/// Quotes are kept ordered by strike, calls before puts. When the chain is
/// non-empty the ATM strike is guaranteed to be one of its strikes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionChainSnapshot {
    symbol: String,
    timestamp: DateTime<Utc>,
    spot: f64,
    expiry: DateTime<Utc>,
    atm_strike: f64,
    quotes: Vec<OptionQuote>,
}

impl OptionChainSnapshot {
    /// Build a snapshot, validating the chain.
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        spot: f64,
        expiry: DateTime<Utc>,
        atm_strike: f64,
        mut quotes: Vec<OptionQuote>,
    ) -> Result<Self> {
        let symbol = symbol.into();

        if symbol.is_empty() {
            return Err(Error::invalid_input("snapshot symbol is empty"));
        }
        if !spot.is_finite() || spot <= 0.0 {
            return Err(Error::invalid_input(format!(
                "{}: spot must be positive, got {}",
                symbol, spot
            )));
        }
        if !atm_strike.is_finite() || atm_strike <= 0.0 {
            return Err(Error::invalid_input(format!(
                "{}: ATM strike must be positive, got {}",
                symbol, atm_strike
            )));
        }

        for quote in &quotes {
            if !quote.strike.is_finite() || quote.strike <= 0.0 {
                return Err(Error::invalid_input(format!(
                    "{}: invalid strike {}",
                    symbol, quote.strike
                )));
            }
            if !quote.last_price.is_finite() || quote.last_price < 0.0 {
                return Err(Error::invalid_input(format!(
                    "{}: invalid last price {} at strike {}",
                    symbol, quote.last_price, quote.strike
                )));
            }
        }

        if !quotes.is_empty()
            && !quotes
                .iter()
                .any(|q| (q.strike - atm_strike).abs() < STRIKE_EPSILON)
        {
            return Err(Error::invalid_input(format!(
                "{}: ATM strike {} is not part of the chain",
                symbol, atm_strike
            )));
        }

        quotes.sort_by(|a, b| a.ordering(b));
        if let Some(pair) = quotes.windows(2).find(|pair| {
            pair[0].option_type == pair[1].option_type
                && (pair[0].strike - pair[1].strike).abs() < STRIKE_EPSILON
        }) {
            return Err(Error::invalid_input(format!(
                "{}: duplicate {} quote at strike {}",
                symbol, pair[1].option_type, pair[1].strike
            )));
        }

        Ok(Self {
            symbol,
            timestamp,
            spot,
            expiry,
            atm_strike,
            quotes,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn spot(&self) -> f64 {
        self.spot
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }

    pub fn atm_strike(&self) -> f64 {
        self.atm_strike
    }

    pub fn quotes(&self) -> &[OptionQuote] {
        &self.quotes
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
        }
    }

    /// Distinct strikes in ascending order
    pub fn strikes(&self) -> Vec<f64> {
        let mut strikes: Vec<f64> = Vec::new();
        for quote in &self.quotes {
            match strikes.last() {
                Some(last) if (last - quote.strike).abs() < STRIKE_EPSILON => {}
                _ => strikes.push(quote.strike),
            }
        }
        strikes
    }

    pub fn contains_strike(&self, strike: f64) -> bool {
        self.quotes
            .iter()
            .any(|q| (q.strike - strike).abs() < STRIKE_EPSILON)
    }

    /// Find the quote for a strike and side
    pub fn quote(&self, strike: f64, option_type: OptionType) -> Option<&OptionQuote> {
        self.quotes.iter().find(|q| {
            q.option_type == option_type && (q.strike - strike).abs() < STRIKE_EPSILON
        })
    }

    /// Age of the snapshot relative to `now` (negative ages clamp to zero)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.timestamp).max(Duration::zero())
    }

    /// Time to expiry in years, measured from the snapshot timestamp
    pub fn time_to_expiry_years(&self) -> f64 {
        let seconds = (self.expiry - self.timestamp).num_milliseconds() as f64 / 1000.0;
        seconds / (365.25 * 24.0 * 3600.0)
    }
}

/// Health status of a monitored component, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health report for a single component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub component: String,
    pub status: HealthStatus,
    pub last_success_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    pub last_error: Option<String>,
}

impl HealthReport {
    /// A fresh, healthy report with no history
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            last_success_time: None,
            last_failure_time: None,
            consecutive_failures: 0,
            total_successes: 0,
            total_failures: 0,
            last_error: None,
        }
    }

    /// An unhealthy report carrying the error that caused it
    pub fn unhealthy(component: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            last_error: Some(error.into()),
            ..Self::new(component)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Phase of the trading day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    PreOpen,
    Regular,
    PostClose,
    Closed,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::PreOpen => write!(f, "pre_open"),
            SessionPhase::Regular => write!(f, "regular"),
            SessionPhase::PostClose => write!(f, "post_close"),
            SessionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Derived market status, recomputed on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatus {
    pub exchange: String,
    pub is_open: bool,
    pub phase: SessionPhase,
    pub current_time: DateTime<Utc>,
    pub next_open: Option<DateTime<Utc>>,
    pub next_close: Option<DateTime<Utc>>,
    pub holiday: Option<Holiday>,
}

/// A named exchange holiday
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    pub date: NaiveDate,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, 6, 0, 0).unwrap()
    }

    fn chain() -> Vec<OptionQuote> {
        vec![
            OptionQuote::new(19550.0, OptionType::Put, 120.0, 10, 5),
            OptionQuote::new(19500.0, OptionType::Put, 90.0, 10, 5),
            OptionQuote::new(19500.0, OptionType::Call, 95.0, 10, 5),
            OptionQuote::new(19550.0, OptionType::Call, 70.0, 10, 5),
        ]
    }

    #[test]
    fn test_snapshot_sorts_quotes() {
        let snapshot = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19500.0,
            chain(),
        )
        .unwrap();

        let order: Vec<(f64, OptionType)> = snapshot
            .quotes()
            .iter()
            .map(|q| (q.strike, q.option_type))
            .collect();
        assert_eq!(
            order,
            vec![
                (19500.0, OptionType::Call),
                (19500.0, OptionType::Put),
                (19550.0, OptionType::Call),
                (19550.0, OptionType::Put),
            ]
        );
        assert_eq!(snapshot.strikes(), vec![19500.0, 19550.0]);
    }

    #[test]
    fn test_snapshot_rejects_foreign_atm() {
        let result = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19600.0,
            chain(),
        );
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_snapshot_rejects_duplicate_leg() {
        let mut quotes = chain();
        quotes.push(OptionQuote::new(19500.0, OptionType::Put, 90.0, 10, 1));
        let result = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19500.0,
            quotes,
        );
        assert!(matches!(result, Err(Error::InvalidInput(m)) if m.contains("duplicate")));
    }

    #[test]
    fn test_empty_chain_is_allowed() {
        let snapshot = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19500.0,
            vec![],
        )
        .unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.strikes().is_empty());
    }

    #[test]
    fn test_snapshot_rejects_negative_price() {
        let mut quotes = chain();
        quotes[0].last_price = -1.0;
        let result = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19500.0,
            quotes,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_time_to_expiry_uses_snapshot_clock() {
        let snapshot = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::hours((365.25 * 24.0) as i64),
            19500.0,
            chain(),
        )
        .unwrap();
        assert!((snapshot.time_to_expiry_years() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_age_clamps_future_timestamps() {
        let snapshot = OptionChainSnapshot::new(
            "NIFTY",
            ts(),
            19510.0,
            ts() + Duration::days(7),
            19500.0,
            chain(),
        )
        .unwrap();
        assert_eq!(snapshot.age(ts() - Duration::seconds(5)), Duration::zero());
        assert_eq!(snapshot.age(ts() + Duration::seconds(5)), Duration::seconds(5));
    }

    #[test]
    fn test_health_status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Degraded);
        assert!(HealthStatus::Degraded < HealthStatus::Unhealthy);
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[test]
    fn test_option_type_suffix() {
        assert_eq!(OptionType::Call.suffix(), "CE");
        assert_eq!(OptionType::Put.suffix(), "PE");
        assert_eq!(OptionType::Put.to_string(), "put");
    }
}
