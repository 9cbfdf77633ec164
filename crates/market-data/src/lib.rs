//! Market data for the G6 collector
//!
//! This crate provides the exchange session calendar and the analytics
//! derived from raw option chains.
//!
//! # Core Components
//!
//! - [`session`] - Exchange trading calendar (open/closed, phases, holidays)
//! - [`black_scholes`] - Black-Scholes pricing, Greeks and a safeguarded IV solver
//! - [`analytics`] - Per-strike IV/Greeks and chain aggregates (PCR, skew, max pain)
//!
//! # Key Invariants
//!
//! - Analytics are pure: the same snapshot always yields the same result
//! - Time to expiry is measured from the snapshot timestamp, never the wall clock
//! - A leg whose IV cannot be solved is marked unsolved and never aborts its chain

pub mod analytics;
pub mod black_scholes;
pub mod error;
pub mod session;
pub mod types;

pub use analytics::AnalyticsEngine;
pub use error::MarketDataError;
pub use session::MarketSession;
pub use types::{
    AnalyticsResult, BSInputs, ChainAggregates, Greeks, IvSolution, LegAnalytics, PcrSentiment,
    SolverSettings, StrikeAnalytics, UnsolvedReason,
};

pub type Result<T> = std::result::Result<T, MarketDataError>;
