//! G6 collection scheduler
//!
//! Drives periodic option chain collection for every configured symbol:
//!
//! ```text
//! tick ─► MarketSession gate ─► DataProvider (ATM, overview) ─► AnalyticsEngine
//!                                                                     │
//!                       HealthMonitor / MetricsRegistry / results ◄─ Recorder
//! ```
//!
//! - [`scheduler`] - Tick loop, per-symbol cycles, start/stop/status
//! - [`cycle`] - Phases, retry policy, in-flight arena and outcomes
//! - [`recorder`] - Single task applying outcomes to shared state
//! - [`shutdown`] - Cancellation for the tick loop and cycles
//!
//! # Key Invariants
//!
//! - At most one cycle in flight per symbol
//! - A closed market means zero provider calls
//! - Retry budget N allows at most N+1 provider attempts per cycle
//! - A faulted cycle records exactly one health failure

pub mod cycle;
pub mod error;
pub mod recorder;
pub mod scheduler;
pub mod shutdown;

pub use cycle::{CycleOutcome, CyclePhase, CycleRecord, CycleStep, RetryPolicy, SkipReason};
pub use error::{CollectorError, Result};
pub use recorder::{collector_component, CollectorMetrics, ResultStore, SymbolStatus};
pub use scheduler::{Clock, CollectionScheduler, SchedulerStatus, SessionGate};
pub use shutdown::ShutdownController;
