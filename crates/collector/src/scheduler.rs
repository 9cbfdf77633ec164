//! Collection scheduler
//!
//! A driver task ticks on a fixed interval and spawns one cycle per symbol.
//! Each cycle is gated by the market session, fetches the ATM strike and
//! the chain overview with a bounded retry budget, computes analytics and
//! hands its outcome to the recorder.

use crate::cycle::{
    CycleOutcome, CyclePhase, CycleRecord, CycleStep, InFlightArena, InFlightGuard, RetryPolicy,
    SkipReason,
};
use crate::error::{CollectorError, Result};
use crate::recorder::{
    collector_component, CollectorMetrics, Recorder, RecorderMessage, ResultStore, SymbolStatus,
};
use crate::shutdown::{run_until_shutdown, ShutdownController};
use chrono::{DateTime, Utc};
use common::{HealthReport, HealthStatus, OptionChainSnapshot, STRIKE_EPSILON};
use config::G6Config;
use market_data::{AnalyticsEngine, AnalyticsResult, MarketSession};
use observability::{HealthMonitor, MetricsRegistry};
use parking_lot::Mutex;
use provider::{DataProvider, ProviderError, ProviderResult};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Source of "now" for session gating and outcome timestamps
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Whether a manually triggered cycle respects the market session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionGate {
    Enforce,
    Bypass,
}

/// Snapshot of the scheduler for operators
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub market_open: bool,
    pub overall_health: HealthStatus,
    /// Latest self-reported provider health, once a check has run
    pub provider_health: Option<HealthReport>,
    pub symbols: Vec<SymbolStatus>,
    pub in_flight: Vec<CycleRecord>,
}

struct Inner {
    symbols: Vec<String>,
    session: MarketSession,
    provider: Arc<dyn DataProvider>,
    engine: AnalyticsEngine,
    policy: RetryPolicy,
    call_timeout: Duration,
    interval: Duration,
    grace: Duration,
    arena: Arc<InFlightArena>,
    store: Arc<ResultStore>,
    health: Arc<HealthMonitor>,
    metrics: CollectorMetrics,
    outcomes: mpsc::Sender<RecorderMessage>,
    provider_health: Mutex<Option<HealthReport>>,
    clock: Clock,
}

struct Running {
    shutdown: ShutdownController,
    driver: JoinHandle<()>,
}

/// Owns the collection loop for every configured symbol
pub struct CollectionScheduler {
    inner: Arc<Inner>,
    running: Mutex<Option<Running>>,
    recorder: JoinHandle<()>,
}

impl CollectionScheduler {
    /// Build a scheduler and start its recorder task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        cfg: &G6Config,
        provider: Arc<dyn DataProvider>,
        health: Arc<HealthMonitor>,
        registry: Arc<MetricsRegistry>,
    ) -> Result<Self> {
        Self::with_clock(cfg, provider, health, registry, Arc::new(Utc::now))
    }

    pub fn with_clock(
        cfg: &G6Config,
        provider: Arc<dyn DataProvider>,
        health: Arc<HealthMonitor>,
        registry: Arc<MetricsRegistry>,
        clock: Clock,
    ) -> Result<Self> {
        let scheduler = &cfg.scheduler;
        if cfg.platform.symbols.is_empty() {
            return Err(CollectorError::Configuration(
                "no symbols configured".to_string(),
            ));
        }
        if scheduler.interval_seconds == 0 || scheduler.channel_capacity == 0 {
            return Err(CollectorError::Configuration(
                "interval_seconds and channel_capacity must be positive".to_string(),
            ));
        }

        let session = MarketSession::new(&cfg.calendar)?;
        let engine = AnalyticsEngine::from_config(&cfg.analytics)?;
        let metrics = CollectorMetrics::register(&registry)?;
        let symbols = cfg.platform.symbols.clone();

        health.register(provider.name());
        for symbol in &symbols {
            health.register(&collector_component(symbol));
        }

        let store = Arc::new(ResultStore::new(&symbols));
        let (tx, rx) = mpsc::channel(scheduler.channel_capacity);
        let recorder = Recorder::new(store.clone(), health.clone(), metrics.clone(), provider.name())
            .spawn(rx);

        info!(
            symbols = ?symbols,
            provider = provider.name(),
            interval_s = scheduler.interval_seconds,
            retry_budget = scheduler.retry_budget,
            "Collection scheduler created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                symbols,
                session,
                provider,
                engine,
                policy: RetryPolicy::from_config(scheduler),
                call_timeout: Duration::from_millis(cfg.provider.timeout_ms),
                interval: Duration::from_secs(scheduler.interval_seconds),
                grace: Duration::from_secs(scheduler.shutdown_grace_seconds),
                arena: Arc::new(InFlightArena::with_gauge(metrics.in_flight.clone())),
                store,
                health,
                metrics,
                outcomes: tx,
                provider_health: Mutex::new(None),
                clock,
            }),
            running: Mutex::new(None),
            recorder,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.inner.symbols
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.driver.is_finished())
    }

    /// Start ticking. The first tick fires immediately.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.driver.is_finished()) {
            return Err(CollectorError::AlreadyRunning);
        }

        let shutdown = ShutdownController::new();
        let driver = tokio::spawn(drive(self.inner.clone(), shutdown.child_token()));
        *running = Some(Running { shutdown, driver });

        info!(interval = ?self.inner.interval, "Collection started");
        Ok(())
    }

    /// Stop ticking, give in-flight cycles the grace period, abort the rest
    /// and wait until every recorded outcome has been applied.
    pub async fn stop(&self) -> Result<()> {
        let Running { shutdown, driver } =
            self.running.lock().take().ok_or(CollectorError::NotRunning)?;

        shutdown.shutdown();
        if let Err(e) = driver.await {
            error!("Collection driver ended abnormally: {}", e);
        }
        self.flush().await?;

        info!("Collection stopped");
        Ok(())
    }

    /// Wait until every outcome sent so far has been applied
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.inner
            .outcomes
            .send(RecorderMessage::Flush(done))
            .await
            .map_err(|_| CollectorError::RecorderClosed)?;
        wait.await.map_err(|_| CollectorError::RecorderClosed)
    }

    /// Run one cycle for `symbol` outside the tick loop and wait until its
    /// outcome is recorded.
    pub async fn run_cycle(&self, symbol: &str, gate: SessionGate) -> Result<CycleOutcome> {
        if !self.inner.symbols.iter().any(|s| s == symbol) {
            return Err(CollectorError::UnknownSymbol(symbol.to_string()));
        }

        let outcome = match self.inner.claim(symbol) {
            Some(guard) => {
                let token = CancellationToken::new();
                self.inner.execute(guard, gate, &token).await
            }
            None => Some(self.inner.overlap(symbol)),
        };
        let outcome = outcome.ok_or(CollectorError::NotRunning)?;

        self.inner
            .outcomes
            .send(RecorderMessage::Outcome(outcome.clone()))
            .await
            .map_err(|_| CollectorError::RecorderClosed)?;
        self.flush().await?;
        Ok(outcome)
    }

    /// Ask the provider for its own health now. Ticks do this as well.
    pub async fn check_provider(&self) -> HealthReport {
        self.inner.probe_provider().await
    }

    pub fn latest_result(&self, symbol: &str) -> Option<AnalyticsResult> {
        self.inner.store.latest(symbol)
    }

    pub fn status(&self) -> SchedulerStatus {
        let in_flight = self.inner.arena.snapshot();
        let symbols = self
            .inner
            .store
            .statuses()
            .into_iter()
            .map(|mut status| {
                if let Some(record) = in_flight.iter().find(|r| r.symbol == status.symbol) {
                    status.phase = record.phase;
                }
                status
            })
            .collect();

        let provider_health = self.inner.provider_health.lock().clone();
        let overall_health = provider_health
            .as_ref()
            .map_or(HealthStatus::Healthy, |r| r.status)
            .max(self.inner.health.overall());

        SchedulerStatus {
            running: self.is_running(),
            market_open: self.inner.session.is_open((self.inner.clock)()),
            overall_health,
            provider_health,
            symbols,
            in_flight,
        }
    }
}

impl Drop for CollectionScheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.shutdown();
            running.driver.abort();
        }
        self.recorder.abort();
    }
}

/// Tick loop. Ends when `token` is cancelled.
async fn drive(inner: Arc<Inner>, token: CancellationToken) {
    let mut timer = tokio::time::interval(inner.interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut cycles: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = timer.tick() => {
                inner.metrics.ticks.increment(1);
                let probe = inner.clone();
                let probe_token = token.child_token();
                cycles.spawn(async move {
                    run_until_shutdown(&probe_token, probe.probe_provider()).await;
                });
                for symbol in &inner.symbols {
                    match inner.claim(symbol) {
                        Some(guard) => {
                            let inner = inner.clone();
                            let token = token.child_token();
                            cycles.spawn(async move {
                                if let Some(outcome) = inner.execute(guard, SessionGate::Enforce, &token).await {
                                    inner.send(outcome).await;
                                }
                            });
                        }
                        None => {
                            let outcome = inner.overlap(symbol);
                            inner.send(outcome).await;
                        }
                    }
                }
            }
            Some(joined) = cycles.join_next(), if !cycles.is_empty() => {
                if let Err(e) = joined {
                    error!("Cycle task failed: {}", e);
                }
            }
        }
    }

    if cycles.is_empty() {
        return;
    }
    info!(
        in_flight = inner.arena.len(),
        grace = ?inner.grace,
        "Waiting for in-flight cycles"
    );
    let drained = tokio::time::timeout(inner.grace, async {
        while cycles.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(aborted = cycles.len(), "Grace period elapsed, aborting cycles");
        cycles.abort_all();
        while cycles.join_next().await.is_some() {}
    }
}

impl Inner {
    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn claim(&self, symbol: &str) -> Option<InFlightGuard> {
        self.arena.try_claim(CycleRecord::new(symbol, self.now()))
    }

    fn overlap(&self, symbol: &str) -> CycleOutcome {
        CycleOutcome::Skipped {
            symbol: symbol.to_string(),
            reason: SkipReason::Overlap,
            at: self.now(),
        }
    }

    async fn send(&self, outcome: CycleOutcome) {
        if self
            .outcomes
            .send(RecorderMessage::Outcome(outcome))
            .await
            .is_err()
        {
            error!("Recorder is gone, dropping cycle outcome");
        }
    }

    /// Provider self-check bounded by the call timeout. A timeout reads as
    /// unhealthy.
    async fn probe_provider(&self) -> HealthReport {
        let timeout = self.call_timeout;
        let report = tokio::time::timeout(timeout, self.provider.check_health())
            .await
            .unwrap_or_else(|_| {
                HealthReport::unhealthy(
                    self.provider.name(),
                    format!("health check timed out after {:?}", timeout),
                )
            });

        if report.status == HealthStatus::Healthy {
            debug!(provider = %report.component, "Provider reports healthy");
        } else {
            warn!(
                provider = %report.component,
                status = %report.status,
                error = ?report.last_error,
                "Provider reports degraded health"
            );
        }
        *self.provider_health.lock() = Some(report.clone());
        report
    }

    /// One provider call bounded by the call timeout and the shutdown token.
    /// `None` when cancelled.
    async fn call<T, F>(&self, token: &CancellationToken, call: F) -> Option<ProviderResult<T>>
    where
        F: Future<Output = ProviderResult<T>>,
    {
        let timeout = self.call_timeout;
        run_until_shutdown(token, async move {
            tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
                Err(ProviderError::ProviderUnavailable(format!(
                    "provider call timed out after {:?}",
                    timeout
                )))
            })
        })
        .await
    }

    /// Run `step` until it succeeds, faults or the token is cancelled
    async fn with_retries<T, F, Fut>(
        &self,
        guard: &InFlightGuard,
        step: CycleStep,
        token: &CancellationToken,
        mut attempt: F,
    ) -> Option<std::result::Result<T, ProviderError>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        guard.update(|r| r.step = Some(step));
        loop {
            guard.update(|r| r.attempts += 1);
            let error = match self.call(token, attempt()).await? {
                Ok(value) => return Some(Ok(value)),
                Err(e) => e,
            };

            let mut backoff = None;
            guard.update(|r| backoff = r.attempt_failed(&error, &self.policy));
            let Some(backoff) = backoff else {
                return Some(Err(error));
            };

            let retries_used = guard.record().map_or(0, |r| r.retries_used);
            warn!(
                symbol = guard.symbol(),
                cycle_id = %guard.cycle_id(),
                %step,
                attempt = retries_used,
                budget = self.policy.budget,
                error_kind = error.kind(),
                error = %error,
                "Provider call failed, retrying in {:?}",
                backoff
            );
            run_until_shutdown(token, tokio::time::sleep(backoff)).await?;
        }
    }

    /// ATM then overview, each with retries. `Err` carries the failing step.
    async fn fetch(
        &self,
        guard: &InFlightGuard,
        symbol: &str,
        token: &CancellationToken,
    ) -> Option<std::result::Result<(f64, OptionChainSnapshot), (CycleStep, ProviderError)>> {
        let provider = &self.provider;

        let atm = match self
            .with_retries(guard, CycleStep::FetchAtm, token, || provider.fetch_atm(symbol))
            .await?
        {
            Ok(atm) => atm,
            Err(e) => return Some(Err((CycleStep::FetchAtm, e))),
        };

        let snapshot = self
            .with_retries(guard, CycleStep::FetchOverview, token, || {
                provider.fetch_overview(symbol)
            })
            .await?;
        Some(
            snapshot
                .map(|s| (atm, s))
                .map_err(|e| (CycleStep::FetchOverview, e)),
        )
    }

    /// Execute a claimed cycle. `None` when cancelled mid-cycle.
    #[instrument(skip_all, fields(symbol = guard.symbol(), cycle_id = %guard.cycle_id()))]
    async fn execute(
        &self,
        guard: InFlightGuard,
        gate: SessionGate,
        token: &CancellationToken,
    ) -> Option<CycleOutcome> {
        let symbol = guard.symbol().to_string();
        let cycle_id = guard.cycle_id();
        let started = Instant::now();

        if gate == SessionGate::Enforce && !self.session.is_open(self.now()) {
            guard.set_phase(CyclePhase::Gated);
            return Some(CycleOutcome::Skipped {
                symbol,
                reason: SkipReason::MarketClosed,
                at: self.now(),
            });
        }

        guard.set_phase(CyclePhase::Collecting);
        debug!("Collecting");
        let fetched = self.fetch(&guard, &symbol, token).await?;

        let retries = guard.record().map_or(0, |r| r.retries_used);
        let (atm, snapshot) = match fetched {
            Ok(pair) => pair,
            Err((step, error)) => {
                guard.set_phase(CyclePhase::Faulted);
                return Some(CycleOutcome::Faulted {
                    cycle_id,
                    symbol,
                    step,
                    error,
                    retries,
                    duration: started.elapsed(),
                    at: self.now(),
                });
            }
        };

        guard.set_phase(CyclePhase::Recording);
        let atm_drift = (snapshot.atm_strike() - atm).abs() > STRIKE_EPSILON;
        if atm_drift {
            warn!(
                fetched_atm = atm,
                snapshot_atm = snapshot.atm_strike(),
                "ATM moved between calls, using the snapshot's"
            );
        }
        let empty_chain = snapshot.is_empty();
        if empty_chain {
            warn!("Provider returned an empty chain");
        }

        let result = self.engine.compute(&snapshot);
        Some(CycleOutcome::Succeeded {
            cycle_id,
            symbol,
            result: Box::new(result),
            retries,
            duration: started.elapsed(),
            empty_chain,
            atm_drift,
            at: self.now(),
        })
    }
}
