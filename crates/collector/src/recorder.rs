//! Single writer for cycle outcomes
//!
//! Cycle tasks send their outcome over a channel; the recorder task applies
//! each one in a single synchronous step to the result store, the health
//! monitor and the metrics registry.

use crate::cycle::{CycleOutcome, CyclePhase, SkipReason};
use crate::error::Result;
use chrono::{DateTime, Utc};
use market_data::AnalyticsResult;
use observability::{CounterHandle, GaugeHandle, HealthMonitor, HistogramHandle, MetricsRegistry};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Health component name for a symbol's collection
pub fn collector_component(symbol: &str) -> String {
    format!("collector.{}", symbol)
}

/// Typed handles for every collector metric
#[derive(Debug, Clone)]
pub struct CollectorMetrics {
    pub ticks: CounterHandle,
    pub skipped: CounterHandle,
    pub overlap_skipped: CounterHandle,
    pub succeeded: CounterHandle,
    pub faulted: CounterHandle,
    pub retries: CounterHandle,
    pub empty_chains: CounterHandle,
    pub atm_drift: CounterHandle,
    pub legs_solved: CounterHandle,
    pub legs_unsolved: CounterHandle,
    pub in_flight: GaugeHandle,
    pub cycle_duration: HistogramHandle,
}

impl CollectorMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        Ok(Self {
            ticks: registry.register_counter("collection_ticks_total", "Scheduler ticks")?,
            skipped: registry.register_counter(
                "collection_skipped_total",
                "Symbol cycles skipped because the market was closed",
            )?,
            overlap_skipped: registry.register_counter(
                "collection_overlap_skipped_total",
                "Symbol cycles skipped because the previous cycle was still in flight",
            )?,
            succeeded: registry.register_counter(
                "collection_cycles_succeeded_total",
                "Cycles that produced analytics",
            )?,
            faulted: registry.register_counter(
                "collection_cycles_faulted_total",
                "Cycles that ended faulted",
            )?,
            retries: registry.register_counter(
                "collection_retries_total",
                "Provider call retries across all cycles",
            )?,
            empty_chains: registry.register_counter(
                "collection_empty_chains_total",
                "Snapshots returned without quotes",
            )?,
            atm_drift: registry.register_counter(
                "collection_atm_drift_total",
                "Cycles whose snapshot ATM differed from the fetched ATM",
            )?,
            legs_solved: registry.register_counter(
                "analytics_legs_solved_total",
                "Option legs with a solved implied volatility",
            )?,
            legs_unsolved: registry.register_counter(
                "analytics_legs_unsolved_total",
                "Option legs whose implied volatility could not be solved",
            )?,
            in_flight: registry.register_gauge(
                "collection_cycles_in_flight",
                "Cycles currently in flight",
            )?,
            cycle_duration: registry.register_histogram(
                "collection_cycle_duration_seconds",
                "Wall time of completed cycles",
            )?,
        })
    }
}

/// Per-symbol collection summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolStatus {
    pub symbol: String,
    pub phase: CyclePhase,
    pub last_outcome_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub cycles_succeeded: u64,
    pub cycles_faulted: u64,
    pub skipped: u64,
    pub overlap_skipped: u64,
    pub last_error: Option<String>,
}

impl SymbolStatus {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            phase: CyclePhase::Idle,
            last_outcome_at: None,
            last_success_at: None,
            cycles_succeeded: 0,
            cycles_faulted: 0,
            skipped: 0,
            overlap_skipped: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    results: BTreeMap<String, AnalyticsResult>,
    symbols: BTreeMap<String, SymbolStatus>,
}

/// Latest analytics and status per symbol
#[derive(Debug, Default)]
pub struct ResultStore {
    inner: RwLock<StoreInner>,
}

impl ResultStore {
    pub fn new(symbols: &[String]) -> Self {
        let symbols = symbols
            .iter()
            .map(|s| (s.clone(), SymbolStatus::new(s)))
            .collect();
        Self {
            inner: RwLock::new(StoreInner {
                results: BTreeMap::new(),
                symbols,
            }),
        }
    }

    pub fn latest(&self, symbol: &str) -> Option<AnalyticsResult> {
        self.inner.read().results.get(symbol).cloned()
    }

    pub fn status(&self, symbol: &str) -> Option<SymbolStatus> {
        self.inner.read().symbols.get(symbol).cloned()
    }

    /// Status of every symbol, ordered by symbol
    pub fn statuses(&self) -> Vec<SymbolStatus> {
        self.inner.read().symbols.values().cloned().collect()
    }

}

pub(crate) enum RecorderMessage {
    Outcome(CycleOutcome),
    Flush(oneshot::Sender<()>),
}

/// Applies outcomes to shared state
#[derive(Debug, Clone)]
pub struct Recorder {
    store: Arc<ResultStore>,
    health: Arc<HealthMonitor>,
    metrics: CollectorMetrics,
    provider_component: String,
}

impl Recorder {
    pub fn new(
        store: Arc<ResultStore>,
        health: Arc<HealthMonitor>,
        metrics: CollectorMetrics,
        provider_component: &str,
    ) -> Self {
        Self {
            store,
            health,
            metrics,
            provider_component: provider_component.to_string(),
        }
    }

    /// Apply one outcome. The store lock is held for the whole update so
    /// readers never observe half of an outcome.
    pub fn apply(&self, outcome: CycleOutcome) {
        let phase = outcome.settled_phase();
        let mut store = self.store.inner.write();
        let symbol = outcome.symbol().to_string();
        let status = store
            .symbols
            .entry(symbol.clone())
            .or_insert_with(|| SymbolStatus::new(&symbol));
        status.phase = phase;

        match outcome {
            CycleOutcome::Skipped { reason, at, .. } => {
                status.last_outcome_at = Some(at);
                match reason {
                    SkipReason::MarketClosed => {
                        status.skipped += 1;
                        self.metrics.skipped.increment(1);
                        debug!(symbol = %symbol, "Market closed, cycle skipped");
                    }
                    SkipReason::Overlap => {
                        status.overlap_skipped += 1;
                        self.metrics.overlap_skipped.increment(1);
                        warn!(symbol = %symbol, "Previous cycle still in flight, tick skipped");
                    }
                }
            }
            CycleOutcome::Succeeded {
                cycle_id,
                result,
                retries,
                duration,
                empty_chain,
                atm_drift,
                at,
                ..
            } => {
                status.last_outcome_at = Some(at);
                status.last_success_at = Some(at);
                status.cycles_succeeded += 1;
                status.last_error = None;

                let aggregates = &result.aggregates;
                self.metrics.succeeded.increment(1);
                self.metrics.retries.increment(retries as u64);
                self.metrics.cycle_duration.observe_duration(duration);
                self.metrics.legs_solved.increment(aggregates.solved_legs as u64);
                self.metrics.legs_unsolved.increment(aggregates.unsolved_legs as u64);
                if empty_chain {
                    self.metrics.empty_chains.increment(1);
                }
                if atm_drift {
                    self.metrics.atm_drift.increment(1);
                }

                self.health.record_success(&collector_component(&symbol), at);
                self.health.record_success(&self.provider_component, at);

                info!(
                    symbol = %symbol,
                    %cycle_id,
                    retries,
                    solved = aggregates.solved_legs,
                    unsolved = aggregates.unsolved_legs,
                    pcr_oi = ?aggregates.pcr_oi,
                    "Cycle recorded"
                );
                store.results.insert(symbol, *result);
            }
            CycleOutcome::Faulted {
                cycle_id,
                step,
                error,
                retries,
                duration,
                at,
                ..
            } => {
                let message = error.to_string();
                status.last_outcome_at = Some(at);
                status.cycles_faulted += 1;
                status.last_error = Some(message.clone());

                self.metrics.faulted.increment(1);
                self.metrics.retries.increment(retries as u64);
                self.metrics.cycle_duration.observe_duration(duration);

                self.health
                    .record_failure(&collector_component(&symbol), &message, at);
                if error.is_retryable() {
                    self.health
                        .record_failure(&self.provider_component, &message, at);
                }

                warn!(
                    symbol = %symbol,
                    %cycle_id,
                    %step,
                    retries,
                    error_kind = error.kind(),
                    error = %message,
                    "Cycle faulted"
                );
            }
        }
    }

    /// Spawn the recorder task. It exits when every sender is dropped.
    pub(crate) fn spawn(self, mut rx: mpsc::Receiver<RecorderMessage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    RecorderMessage::Outcome(outcome) => self.apply(outcome),
                    RecorderMessage::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Recorder stopped");
        })
    }
}
