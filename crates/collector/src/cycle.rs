//! Cycle state: phases, retry policy, the in-flight arena and outcomes

use chrono::{DateTime, Utc};
use config::SchedulerConfig;
use market_data::AnalyticsResult;
use observability::GaugeHandle;
use parking_lot::Mutex;
use provider::ProviderError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-symbol collection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    /// Market closed at the tick; no provider calls made
    Gated,
    Collecting,
    Recording,
    /// Retry budget exhausted or a non-retryable error; cleared by the next tick
    Faulted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Gated => "gated",
            CyclePhase::Collecting => "collecting",
            CyclePhase::Recording => "recording",
            CyclePhase::Faulted => "faulted",
        };
        write!(f, "{}", s)
    }
}

/// Provider call a cycle is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStep {
    FetchAtm,
    FetchOverview,
}

impl fmt::Display for CycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleStep::FetchAtm => write!(f, "fetch_atm"),
            CycleStep::FetchOverview => write!(f, "fetch_overview"),
        }
    }
}

/// Retry budget and exponential backoff shared by both steps of a cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed per cycle; `budget + 1` attempts at most
    pub budget: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &SchedulerConfig) -> Self {
        Self {
            budget: cfg.retry_budget,
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            multiplier: cfg.backoff_multiplier,
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// Delay before retry number `retry` (1-based), capped at `max_backoff`
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Bookkeeping for one in-flight cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleRecord {
    pub cycle_id: Uuid,
    pub symbol: String,
    pub phase: CyclePhase,
    pub started_at: DateTime<Utc>,
    pub step: Option<CycleStep>,
    pub attempts: u32,
    pub retries_used: u32,
    pub last_error: Option<String>,
}

impl CycleRecord {
    pub fn new(symbol: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            phase: CyclePhase::Idle,
            started_at,
            step: None,
            attempts: 0,
            retries_used: 0,
            last_error: None,
        }
    }

    pub fn retries_left(&self, policy: &RetryPolicy) -> u32 {
        policy.budget.saturating_sub(self.retries_used)
    }

    /// Register a failed attempt. Returns the backoff to sleep before the
    /// next attempt, or `None` when the error is final for this cycle.
    pub fn attempt_failed(&mut self, error: &ProviderError, policy: &RetryPolicy) -> Option<Duration> {
        self.last_error = Some(error.to_string());
        if !error.is_retryable() || self.retries_left(policy) == 0 {
            return None;
        }
        self.retries_used += 1;
        Some(policy.backoff_for(self.retries_used))
    }
}

/// Cycles currently in flight, at most one per symbol
#[derive(Debug, Default)]
pub struct InFlightArena {
    cycles: Mutex<BTreeMap<String, CycleRecord>>,
    gauge: Option<GaugeHandle>,
}

impl InFlightArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena that mirrors its size into a gauge
    pub fn with_gauge(gauge: GaugeHandle) -> Self {
        Self {
            cycles: Mutex::new(BTreeMap::new()),
            gauge: Some(gauge),
        }
    }

    /// Claim `record.symbol`. Fails when a cycle for the symbol is in flight.
    pub fn try_claim(self: &Arc<Self>, record: CycleRecord) -> Option<InFlightGuard> {
        let symbol = record.symbol.clone();
        let cycle_id = record.cycle_id;
        {
            let mut cycles = self.cycles.lock();
            if cycles.contains_key(&symbol) {
                return None;
            }
            cycles.insert(symbol.clone(), record);
            self.publish(cycles.len());
        }
        Some(InFlightGuard {
            arena: Arc::clone(self),
            symbol,
            cycle_id,
        })
    }

    pub fn get(&self, symbol: &str) -> Option<CycleRecord> {
        self.cycles.lock().get(symbol).cloned()
    }

    pub fn len(&self) -> usize {
        self.cycles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In-flight cycles ordered by symbol
    pub fn snapshot(&self) -> Vec<CycleRecord> {
        self.cycles.lock().values().cloned().collect()
    }

    fn update(&self, symbol: &str, cycle_id: Uuid, f: impl FnOnce(&mut CycleRecord)) {
        if let Some(record) = self.cycles.lock().get_mut(symbol) {
            if record.cycle_id == cycle_id {
                f(record);
            }
        }
    }

    fn release(&self, symbol: &str, cycle_id: Uuid) {
        let mut cycles = self.cycles.lock();
        if cycles.get(symbol).is_some_and(|r| r.cycle_id == cycle_id) {
            cycles.remove(symbol);
        }
        self.publish(cycles.len());
    }

    fn publish(&self, len: usize) {
        if let Some(gauge) = &self.gauge {
            gauge.set(len as f64);
        }
    }
}

/// Exclusive claim on a symbol; released on drop, including when the
/// owning task is aborted.
#[derive(Debug)]
pub struct InFlightGuard {
    arena: Arc<InFlightArena>,
    symbol: String,
    cycle_id: Uuid,
}

impl InFlightGuard {
    pub fn cycle_id(&self) -> Uuid {
        self.cycle_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn record(&self) -> Option<CycleRecord> {
        self.arena.get(&self.symbol)
    }

    pub fn update(&self, f: impl FnOnce(&mut CycleRecord)) {
        self.arena.update(&self.symbol, self.cycle_id, f);
    }

    pub fn set_phase(&self, phase: CyclePhase) {
        self.update(|r| r.phase = phase);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.arena.release(&self.symbol, self.cycle_id);
    }
}

/// Why a tick produced no cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    MarketClosed,
    /// Previous cycle for the symbol still in flight
    Overlap,
}

/// Result of one cycle, applied atomically by the recorder
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped {
        symbol: String,
        reason: SkipReason,
        at: DateTime<Utc>,
    },
    Succeeded {
        cycle_id: Uuid,
        symbol: String,
        result: Box<AnalyticsResult>,
        retries: u32,
        duration: Duration,
        empty_chain: bool,
        atm_drift: bool,
        at: DateTime<Utc>,
    },
    Faulted {
        cycle_id: Uuid,
        symbol: String,
        step: CycleStep,
        error: ProviderError,
        retries: u32,
        duration: Duration,
        at: DateTime<Utc>,
    },
}

impl CycleOutcome {
    pub fn symbol(&self) -> &str {
        match self {
            CycleOutcome::Skipped { symbol, .. }
            | CycleOutcome::Succeeded { symbol, .. }
            | CycleOutcome::Faulted { symbol, .. } => symbol,
        }
    }

    /// Phase the symbol settles in after this outcome
    pub fn settled_phase(&self) -> CyclePhase {
        match self {
            CycleOutcome::Skipped {
                reason: SkipReason::MarketClosed,
                ..
            } => CyclePhase::Gated,
            CycleOutcome::Skipped { .. } | CycleOutcome::Succeeded { .. } => CyclePhase::Idle,
            CycleOutcome::Faulted { .. } => CyclePhase::Faulted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            budget: 2,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2.0,
            max_backoff: Duration::from_millis(1500),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = policy();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(1500));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(1500));
    }

    #[test]
    fn test_budget_bounds_attempts() {
        let policy = policy();
        let mut record = CycleRecord::new("NIFTY", Utc::now());
        let err = ProviderError::ProviderUnavailable("down".to_string());

        assert!(record.attempt_failed(&err, &policy).is_some());
        assert!(record.attempt_failed(&err, &policy).is_some());
        assert_eq!(record.attempt_failed(&err, &policy), None);
        assert_eq!(record.retries_used, 2);
        assert_eq!(record.retries_left(&policy), 0);
    }

    #[test]
    fn test_invalid_symbol_not_retried() {
        let mut record = CycleRecord::new("NIFTY", Utc::now());
        let err = ProviderError::InvalidSymbol("NIFTY".to_string());
        assert_eq!(record.attempt_failed(&err, &policy()), None);
        assert_eq!(record.retries_used, 0);
        assert!(record.last_error.is_some());
    }

    #[test]
    fn test_arena_one_cycle_per_symbol() {
        let arena = Arc::new(InFlightArena::new());
        let guard = arena
            .try_claim(CycleRecord::new("NIFTY", Utc::now()))
            .unwrap();
        assert!(arena.try_claim(CycleRecord::new("NIFTY", Utc::now())).is_none());
        assert!(arena.try_claim(CycleRecord::new("BANKNIFTY", Utc::now())).is_some());

        guard.set_phase(CyclePhase::Collecting);
        assert_eq!(arena.get("NIFTY").unwrap().phase, CyclePhase::Collecting);

        drop(guard);
        assert!(arena.get("NIFTY").is_none());
        // The BANKNIFTY guard was dropped immediately
        assert!(arena.is_empty());
    }

    #[test]
    fn test_settled_phase() {
        let skipped = CycleOutcome::Skipped {
            symbol: "NIFTY".to_string(),
            reason: SkipReason::MarketClosed,
            at: Utc::now(),
        };
        assert_eq!(skipped.settled_phase(), CyclePhase::Gated);
        assert_eq!(skipped.symbol(), "NIFTY");
    }
}
