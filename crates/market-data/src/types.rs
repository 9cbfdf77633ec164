//! Pricing inputs and analytics result types

use crate::black_scholes::{MAX_VOL, MIN_VOL};
use common::{OptionType, SnapshotKey};
use serde::{Deserialize, Serialize};

/// Inputs for Black-Scholes pricing
#[derive(Debug, Clone, Copy)]
pub struct BSInputs {
    /// Spot price of the underlying
    pub spot: f64,
    /// Strike price
    pub strike: f64,
    /// Time to expiry (in years)
    pub time: f64,
    /// Volatility (as decimal, e.g., 0.18 = 18%)
    pub vol: f64,
    /// Risk-free rate
    pub rate: f64,
    /// Option type
    pub option_type: OptionType,
}

impl BSInputs {
    /// Validate and clamp inputs to safe ranges
    pub fn validate(&mut self) {
        self.time = self.time.max(1.0 / (365.25 * 24.0 * 3600.0));
        self.vol = self.vol.clamp(MIN_VOL, MAX_VOL);
        self.spot = self.spot.max(1e-6);
        self.strike = self.strike.max(1e-6);
    }
}

/// Option Greeks
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Greeks {
    /// Delta: ∂V/∂S (rate of change with spot)
    pub delta: f64,
    /// Gamma: ∂²V/∂S² (curvature of delta)
    pub gamma: f64,
    /// Vega: ∂V/∂σ (sensitivity to volatility)
    pub vega: f64,
    /// Theta: ∂V/∂t (time decay, per year)
    pub theta: f64,
    /// Rho: ∂V/∂r (sensitivity to interest rate)
    pub rho: f64,
}

/// Implied volatility solver settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub risk_free_rate: f64,
    /// Absolute price tolerance
    pub tolerance: f64,
    pub max_iterations: u32,
    pub initial_guess: f64,
    pub min_vol: f64,
    pub max_vol: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.06,
            tolerance: 1e-6,
            max_iterations: 100,
            initial_guess: 0.2,
            min_vol: MIN_VOL,
            max_vol: MAX_VOL,
        }
    }
}

/// Why a leg's implied volatility could not be solved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsolvedReason {
    /// Quoted price is zero, negative or not finite
    NonPositivePrice,
    /// Price is below the discounted intrinsic value
    BelowIntrinsic,
    /// Price is at or above the no-arbitrage upper bound
    AboveUpperBound,
    /// No volatility inside the bracket reproduces the price
    NotBracketed,
    /// Iteration cap reached before converging
    MaxIterations,
}

impl std::fmt::Display for UnsolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UnsolvedReason::NonPositivePrice => "non_positive_price",
            UnsolvedReason::BelowIntrinsic => "below_intrinsic",
            UnsolvedReason::AboveUpperBound => "above_upper_bound",
            UnsolvedReason::NotBracketed => "not_bracketed",
            UnsolvedReason::MaxIterations => "max_iterations",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IvSolution {
    Solved { iv: f64, iterations: u32 },
    Unsolved { reason: UnsolvedReason },
}

impl IvSolution {
    pub fn iv(&self) -> Option<f64> {
        match self {
            IvSolution::Solved { iv, .. } => Some(*iv),
            IvSolution::Unsolved { .. } => None,
        }
    }

    pub fn is_solved(&self) -> bool {
        matches!(self, IvSolution::Solved { .. })
    }
}

/// Analytics for one side of one strike
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegAnalytics {
    pub last_price: f64,
    pub open_interest: u64,
    pub volume: u64,
    pub iv: IvSolution,
    pub greeks: Option<Greeks>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrikeAnalytics {
    pub strike: f64,
    pub call: Option<LegAnalytics>,
    pub put: Option<LegAnalytics>,
}

impl StrikeAnalytics {
    pub fn leg(&self, option_type: OptionType) -> Option<&LegAnalytics> {
        match option_type {
            OptionType::Call => self.call.as_ref(),
            OptionType::Put => self.put.as_ref(),
        }
    }
}

/// Chain-wide figures computed over solved legs only.
///
/// Ratios are put over call and are `None` when the call side is zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainAggregates {
    pub pcr_oi: Option<f64>,
    pub pcr_volume: Option<f64>,
    /// Ratio of OI-weighted premium (last price x open interest)
    pub pcr_premium: Option<f64>,
    pub atm_iv: Option<f64>,
    pub avg_call_iv: Option<f64>,
    pub avg_put_iv: Option<f64>,
    /// Average put IV minus average call IV
    pub iv_skew: Option<f64>,
    pub max_pain_strike: Option<f64>,
    pub max_pain_value: Option<f64>,
    /// Sum of gamma x OI x strike^2 x 0.01 over legs with Greeks
    pub gamma_exposure: Option<f64>,
    /// Sum of delta x OI x strike over legs with Greeks
    pub delta_exposure: Option<f64>,
    /// Sum of theta x OI over legs with Greeks
    pub theta_decay: Option<f64>,
    /// Blend of PCR, IV skew and volume momentum in [-1, 1]; positive is bullish
    pub sentiment_score: Option<f64>,
    /// Call minus put volume over total volume, in [-1, 1]
    pub momentum_score: Option<f64>,
    pub pcr_sentiment: Option<PcrSentiment>,
    pub total_call_oi: u64,
    pub total_put_oi: u64,
    pub total_call_volume: u64,
    pub total_put_volume: u64,
    pub solved_legs: u32,
    pub unsolved_legs: u32,
}

/// Market bias read from the blended put/call ratios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PcrSentiment {
    StrongBearish,
    Bearish,
    Neutral,
    Bullish,
    StrongBullish,
}

impl PcrSentiment {
    /// Classify `0.4 * pcr_volume + 0.4 * pcr_oi + 0.2 * pcr_premium`
    pub fn from_weighted_pcr(weighted: f64) -> Self {
        if weighted > 1.3 {
            PcrSentiment::StrongBearish
        } else if weighted > 1.1 {
            PcrSentiment::Bearish
        } else if weighted > 0.9 {
            PcrSentiment::Neutral
        } else if weighted > 0.7 {
            PcrSentiment::Bullish
        } else {
            PcrSentiment::StrongBullish
        }
    }
}

impl std::fmt::Display for PcrSentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PcrSentiment::StrongBearish => "strong_bearish",
            PcrSentiment::Bearish => "bearish",
            PcrSentiment::Neutral => "neutral",
            PcrSentiment::Bullish => "bullish",
            PcrSentiment::StrongBullish => "strong_bullish",
        };
        write!(f, "{}", s)
    }
}

/// Analytics derived from one snapshot; refers to it by key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsResult {
    pub key: SnapshotKey,
    pub spot: f64,
    pub atm_strike: f64,
    pub time_to_expiry: f64,
    pub strikes: Vec<StrikeAnalytics>,
    pub aggregates: ChainAggregates,
}

impl AnalyticsResult {
    pub fn strike(&self, strike: f64) -> Option<&StrikeAnalytics> {
        self.strikes
            .iter()
            .find(|s| (s.strike - strike).abs() < common::STRIKE_EPSILON)
    }
}
