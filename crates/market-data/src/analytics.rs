//! Option chain analytics
//!
//! Turns an [`OptionChainSnapshot`] into per-strike IV/Greeks and chain
//! aggregates. Everything here is a pure function of the snapshot.

use crate::black_scholes::{black_scholes_greeks, implied_volatility, MAX_VOL, MIN_VOL};
use crate::error::MarketDataError;
use crate::types::{
    AnalyticsResult, BSInputs, ChainAggregates, Greeks, LegAnalytics, PcrSentiment,
    SolverSettings, StrikeAnalytics,
};
use crate::Result;
use common::{OptionChainSnapshot, OptionQuote, OptionType, STRIKE_EPSILON};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Computes analytics for option chain snapshots
#[derive(Debug, Clone)]
pub struct AnalyticsEngine {
    settings: SolverSettings,
    compute_greeks: bool,
}

impl Default for AnalyticsEngine {
    fn default() -> Self {
        Self {
            settings: SolverSettings::default(),
            compute_greeks: true,
        }
    }
}

impl AnalyticsEngine {
    pub fn new(settings: SolverSettings) -> Result<Self> {
        if !(settings.min_vol >= MIN_VOL
            && settings.max_vol <= MAX_VOL
            && settings.min_vol < settings.max_vol)
        {
            return Err(MarketDataError::Configuration(format!(
                "volatility bracket must satisfy {} <= min < max <= {}, got [{}, {}]",
                MIN_VOL, MAX_VOL, settings.min_vol, settings.max_vol
            )));
        }
        if !settings.tolerance.is_finite() || settings.tolerance <= 0.0 {
            return Err(MarketDataError::Configuration(
                "solver tolerance must be positive".to_string(),
            ));
        }
        if settings.max_iterations == 0 {
            return Err(MarketDataError::Configuration(
                "solver iteration cap must be at least 1".to_string(),
            ));
        }
        if !settings.risk_free_rate.is_finite() {
            return Err(MarketDataError::Configuration(
                "risk-free rate must be finite".to_string(),
            ));
        }
        Ok(Self {
            settings,
            compute_greeks: true,
        })
    }

    pub fn from_config(cfg: &config::AnalyticsConfig) -> Result<Self> {
        let engine = Self::new(SolverSettings {
            risk_free_rate: cfg.risk_free_rate,
            tolerance: cfg.tolerance,
            max_iterations: cfg.max_iterations,
            initial_guess: cfg.initial_guess,
            min_vol: cfg.min_volatility,
            max_vol: cfg.max_volatility,
        })?;
        Ok(engine.with_greeks(cfg.compute_greeks))
    }

    pub fn with_greeks(mut self, compute_greeks: bool) -> Self {
        self.compute_greeks = compute_greeks;
        self
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// Compute analytics for a snapshot.
    ///
    /// Legs whose IV cannot be solved are kept, marked unsolved, and left out
    /// of the aggregates.
    pub fn compute(&self, snapshot: &OptionChainSnapshot) -> AnalyticsResult {
        let time_to_expiry = snapshot.time_to_expiry_years();

        let mut strikes: Vec<StrikeAnalytics> = Vec::new();
        for quote in snapshot.quotes() {
            let leg = self.leg(snapshot.spot(), time_to_expiry, quote);
            let same_strike = strikes
                .last()
                .is_some_and(|s| (s.strike - quote.strike).abs() < STRIKE_EPSILON);
            if !same_strike {
                strikes.push(StrikeAnalytics {
                    strike: quote.strike,
                    call: None,
                    put: None,
                });
            }
            if let Some(entry) = strikes.last_mut() {
                match quote.option_type {
                    OptionType::Call => entry.call = Some(leg),
                    OptionType::Put => entry.put = Some(leg),
                }
            }
        }

        let aggregates = aggregate(&strikes, snapshot.atm_strike());
        debug!(
            symbol = snapshot.symbol(),
            strikes = strikes.len(),
            solved = aggregates.solved_legs,
            unsolved = aggregates.unsolved_legs,
            "Analytics computed"
        );

        AnalyticsResult {
            key: snapshot.key(),
            spot: snapshot.spot(),
            atm_strike: snapshot.atm_strike(),
            time_to_expiry,
            strikes,
            aggregates,
        }
    }

    fn leg(&self, spot: f64, time_to_expiry: f64, quote: &OptionQuote) -> LegAnalytics {
        let input = BSInputs {
            spot,
            strike: quote.strike,
            time: time_to_expiry,
            vol: self.settings.initial_guess,
            rate: self.settings.risk_free_rate,
            option_type: quote.option_type,
        };

        let iv = implied_volatility(quote.last_price, input, &self.settings);
        let greeks = match iv.iv() {
            Some(vol) if self.compute_greeks => Some(black_scholes_greeks(BSInputs { vol, ..input })),
            _ => None,
        };

        if !iv.is_solved() {
            trace!(strike = quote.strike, option_type = %quote.option_type, ?iv, "IV unsolved");
        }

        LegAnalytics {
            last_price: quote.last_price,
            open_interest: quote.open_interest,
            volume: quote.volume,
            iv,
            greeks,
        }
    }
}

/// Skew, in vol points, that saturates the skew component of sentiment
const SKEW_SATURATION_POINTS: f64 = 5.0;

fn ratio(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator > 0.0 {
        Some(numerator / denominator)
    } else {
        None
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn aggregate(strikes: &[StrikeAnalytics], atm_strike: f64) -> ChainAggregates {
    let mut agg = ChainAggregates::default();
    let mut call_premium = 0.0;
    let mut put_premium = 0.0;
    let mut call_ivs = Vec::new();
    let mut put_ivs = Vec::new();
    let mut atm_ivs = Vec::new();
    let mut exposure: Option<(f64, f64, f64)> = None;
    // strike -> (call OI, put OI), ordered for a deterministic max pain scan
    let mut oi_by_strike: BTreeMap<OrderedFloat<f64>, (u64, u64)> = BTreeMap::new();

    for strike in strikes {
        let is_atm = (strike.strike - atm_strike).abs() < STRIKE_EPSILON;
        for (option_type, leg) in [
            (OptionType::Call, strike.call.as_ref()),
            (OptionType::Put, strike.put.as_ref()),
        ] {
            let Some(leg) = leg else { continue };
            let Some(iv) = leg.iv.iv() else {
                agg.unsolved_legs += 1;
                continue;
            };
            agg.solved_legs += 1;

            if let Some(greeks) = &leg.greeks {
                let (gamma, delta, theta) = exposure.get_or_insert((0.0, 0.0, 0.0));
                let (g, d, t) = leg_exposure(greeks, strike.strike, leg.open_interest);
                *gamma += g;
                *delta += d;
                *theta += t;
            }

            let premium = leg.last_price * leg.open_interest as f64;
            let entry = oi_by_strike.entry(OrderedFloat(strike.strike)).or_default();
            match option_type {
                OptionType::Call => {
                    agg.total_call_oi += leg.open_interest;
                    agg.total_call_volume += leg.volume;
                    call_premium += premium;
                    call_ivs.push(iv);
                    entry.0 += leg.open_interest;
                }
                OptionType::Put => {
                    agg.total_put_oi += leg.open_interest;
                    agg.total_put_volume += leg.volume;
                    put_premium += premium;
                    put_ivs.push(iv);
                    entry.1 += leg.open_interest;
                }
            }
            if is_atm {
                atm_ivs.push(iv);
            }
        }
    }

    agg.pcr_oi = ratio(agg.total_put_oi as f64, agg.total_call_oi as f64);
    agg.pcr_volume = ratio(agg.total_put_volume as f64, agg.total_call_volume as f64);
    agg.pcr_premium = ratio(put_premium, call_premium);
    agg.atm_iv = mean(&atm_ivs);
    agg.avg_call_iv = mean(&call_ivs);
    agg.avg_put_iv = mean(&put_ivs);
    agg.iv_skew = match (agg.avg_put_iv, agg.avg_call_iv) {
        (Some(put), Some(call)) => Some(put - call),
        _ => None,
    };

    if let Some((strike, pain)) = max_pain(&oi_by_strike) {
        agg.max_pain_strike = Some(strike);
        agg.max_pain_value = Some(pain);
    }

    if let Some((gamma, delta, theta)) = exposure {
        agg.gamma_exposure = Some(gamma);
        agg.delta_exposure = Some(delta);
        agg.theta_decay = Some(theta);
    }

    let total_volume = agg.total_call_volume + agg.total_put_volume;
    agg.momentum_score = ratio(
        agg.total_call_volume as f64 - agg.total_put_volume as f64,
        total_volume as f64,
    );
    if agg.solved_legs > 0 {
        agg.sentiment_score = Some(sentiment_score(
            agg.pcr_oi,
            agg.iv_skew,
            agg.momentum_score.unwrap_or(0.0),
        ));
    }
    agg.pcr_sentiment = match (agg.pcr_volume, agg.pcr_oi, agg.pcr_premium) {
        (Some(volume), Some(oi), Some(premium)) => Some(PcrSentiment::from_weighted_pcr(
            volume * 0.4 + oi * 0.4 + premium * 0.2,
        )),
        _ => None,
    };

    agg
}

/// Gamma, delta and theta exposure of one leg
fn leg_exposure(greeks: &Greeks, strike: f64, open_interest: u64) -> (f64, f64, f64) {
    let oi = open_interest as f64;
    (
        greeks.gamma * oi * strike * strike * 0.01,
        greeks.delta * oi * strike,
        greeks.theta * oi,
    )
}

/// Combined sentiment in [-1, 1]: 40% PCR, 30% IV skew, 30% volume momentum.
///
/// PCR only contributes outside the 0.7..=1.5 neutral band. A put skew reads
/// bearish.
fn sentiment_score(pcr_oi: Option<f64>, iv_skew: Option<f64>, momentum: f64) -> f64 {
    let pcr = match pcr_oi {
        Some(pcr) if pcr > 1.5 => -(pcr - 1.0).min(1.0),
        Some(pcr) if pcr < 0.7 => ((1.0 - pcr) / 0.3).min(1.0),
        _ => 0.0,
    };
    let skew_points = iv_skew.unwrap_or(0.0) * 100.0;
    let skew = -(skew_points / SKEW_SATURATION_POINTS).clamp(-1.0, 1.0);
    (pcr * 0.4 + skew * 0.3 + momentum * 0.3).clamp(-1.0, 1.0)
}

/// Settlement strike that minimizes the total payout to option holders.
///
/// Ties resolve to the lowest strike. Strikes without open interest are
/// ignored; `None` when nothing has open interest.
pub fn max_pain(oi_by_strike: &BTreeMap<OrderedFloat<f64>, (u64, u64)>) -> Option<(f64, f64)> {
    let with_oi: Vec<(f64, u64, u64)> = oi_by_strike
        .iter()
        .filter(|(_, (call, put))| call + put > 0)
        .map(|(strike, (call, put))| (strike.into_inner(), *call, *put))
        .collect();

    let mut best: Option<(f64, f64)> = None;
    for &(settle, _, _) in &with_oi {
        let pain: f64 = with_oi
            .iter()
            .map(|&(strike, call_oi, put_oi)| {
                let call_pain = (settle - strike).max(0.0) * call_oi as f64;
                let put_pain = (strike - settle).max(0.0) * put_oi as f64;
                call_pain + put_pain
            })
            .sum();
        if best.map_or(true, |(_, current)| pain < current) {
            best = Some((settle, pain));
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::black_scholes::black_scholes_price;
    use crate::types::{IvSolution, UnsolvedReason};
    use assert_matches::assert_matches;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const SPOT: f64 = 19510.0;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 10, 6, 0, 0).unwrap()
    }

    fn expiry() -> DateTime<Utc> {
        at() + Duration::days(7)
    }

    fn model_price(strike: f64, option_type: OptionType, vol: f64) -> f64 {
        black_scholes_price(BSInputs {
            spot: SPOT,
            strike,
            time: 7.0 / 365.25,
            vol,
            rate: 0.06,
            option_type,
        })
    }

    /// Five strikes around 19500, each side priced at 15% vol
    fn nifty_chain(call_oi: u64, put_oi: u64) -> Vec<OptionQuote> {
        let mut quotes = Vec::new();
        for strike in [19400.0, 19450.0, 19500.0, 19550.0, 19600.0] {
            for option_type in [OptionType::Call, OptionType::Put] {
                let oi = if option_type.is_call() { call_oi } else { put_oi };
                quotes.push(OptionQuote::new(
                    strike,
                    option_type,
                    model_price(strike, option_type, 0.15),
                    oi,
                    oi / 20,
                ));
            }
        }
        quotes
    }

    fn snapshot(quotes: Vec<OptionQuote>) -> OptionChainSnapshot {
        OptionChainSnapshot::new("NIFTY", at(), SPOT, expiry(), 19500.0, quotes).unwrap()
    }

    #[test]
    fn test_nifty_five_strike_scenario() {
        let engine = AnalyticsEngine::default();
        let result = engine.compute(&snapshot(nifty_chain(100_000, 120_000)));

        assert_eq!(result.strikes.len(), 5);
        assert_eq!(result.atm_strike, 19500.0);
        assert_eq!(result.key.symbol, "NIFTY");

        let agg = &result.aggregates;
        assert_eq!(agg.solved_legs, 10);
        assert_eq!(agg.unsolved_legs, 0);
        assert_eq!(agg.total_call_oi, 500_000);
        assert_eq!(agg.total_put_oi, 600_000);
        assert!((agg.pcr_oi.unwrap() - 1.2).abs() < 1e-12);
        assert!((agg.pcr_volume.unwrap() - 1.2).abs() < 1e-12);

        let atm_iv = agg.atm_iv.unwrap();
        assert!((atm_iv - 0.15).abs() < 1e-4, "atm iv {}", atm_iv);
        assert!(agg.iv_skew.unwrap().abs() < 1e-4);

        for strike in &result.strikes {
            for leg in [strike.call.as_ref(), strike.put.as_ref()] {
                let leg = leg.unwrap();
                assert_matches!(leg.iv, IvSolution::Solved { iv, .. } if (iv - 0.15).abs() < 1e-4);
                assert!(leg.greeks.is_some());
            }
        }
    }

    #[test]
    fn test_unsolved_leg_does_not_block_aggregates() {
        let mut quotes = nifty_chain(100_000, 100_000);
        // 19600 call quoted at zero
        let idx = quotes
            .iter()
            .position(|q| q.strike == 19600.0 && q.option_type == OptionType::Call)
            .unwrap();
        quotes[idx].last_price = 0.0;

        let result = AnalyticsEngine::default().compute(&snapshot(quotes));
        let agg = &result.aggregates;

        assert_eq!(agg.solved_legs, 9);
        assert_eq!(agg.unsolved_legs, 1);
        assert_eq!(agg.total_call_oi, 400_000);
        assert_eq!(agg.total_put_oi, 500_000);
        assert!((agg.pcr_oi.unwrap() - 1.25).abs() < 1e-12);
        assert!(agg.atm_iv.is_some());

        let leg = result.strike(19600.0).unwrap().call.as_ref().unwrap();
        assert_eq!(
            leg.iv,
            IvSolution::Unsolved {
                reason: UnsolvedReason::NonPositivePrice
            }
        );
        assert!(leg.greeks.is_none());
    }

    #[test]
    fn test_compute_is_deterministic() {
        let engine = AnalyticsEngine::default();
        let snap = snapshot(nifty_chain(75_000, 90_000));

        let first = serde_json::to_string(&engine.compute(&snap)).unwrap();
        let second = serde_json::to_string(&engine.compute(&snap)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_chain_has_empty_aggregates() {
        let result = AnalyticsEngine::default().compute(&snapshot(vec![]));
        assert!(result.strikes.is_empty());
        assert_eq!(result.aggregates, ChainAggregates::default());
    }

    #[test]
    fn test_zero_call_oi_gives_no_ratio() {
        let result = AnalyticsEngine::default().compute(&snapshot(nifty_chain(0, 50_000)));
        assert_eq!(result.aggregates.pcr_oi, None);
        assert_eq!(result.aggregates.pcr_premium, None);
        assert_eq!(result.aggregates.total_put_oi, 250_000);
    }

    #[test]
    fn test_max_pain() {
        let mut oi = BTreeMap::new();
        oi.insert(OrderedFloat(100.0), (10, 0));
        oi.insert(OrderedFloat(110.0), (5, 5));
        oi.insert(OrderedFloat(120.0), (0, 10));
        // settle 100: puts 110 (10*5) + 120 (20*10) = 250
        // settle 110: calls 100 (10*10) + puts 120 (10*10) = 200
        // settle 120: calls 100 (20*10) + 110 (10*5) = 250
        assert_eq!(max_pain(&oi), Some((110.0, 200.0)));

        assert_eq!(max_pain(&BTreeMap::new()), None);
    }

    fn solved_leg(price: f64, oi: u64, volume: u64, iv: f64, greeks: Greeks) -> LegAnalytics {
        LegAnalytics {
            last_price: price,
            open_interest: oi,
            volume,
            iv: IvSolution::Solved { iv, iterations: 3 },
            greeks: Some(greeks),
        }
    }

    fn greeks(delta: f64, gamma: f64, theta: f64) -> Greeks {
        Greeks {
            delta,
            gamma,
            vega: 0.1,
            theta,
            rho: 0.0,
        }
    }

    #[test]
    fn test_exposure_and_sentiment_aggregates() {
        let strikes = vec![
            StrikeAnalytics {
                strike: 100.0,
                call: Some(solved_leg(4.0, 10, 30, 0.20, greeks(0.5, 0.02, -2.0))),
                put: Some(solved_leg(3.0, 20, 10, 0.25, greeks(-0.4, 0.02, -1.0))),
            },
            StrikeAnalytics {
                strike: 110.0,
                call: Some(LegAnalytics {
                    last_price: 0.0,
                    open_interest: 1_000,
                    volume: 1_000,
                    iv: IvSolution::Unsolved {
                        reason: UnsolvedReason::NonPositivePrice,
                    },
                    greeks: None,
                }),
                put: None,
            },
        ];
        let agg = aggregate(&strikes, 100.0);

        // gamma: 0.02*10*100^2*0.01 + 0.02*20*100^2*0.01
        assert!((agg.gamma_exposure.unwrap() - 60.0).abs() < 1e-9);
        // delta: 0.5*10*100 - 0.4*20*100
        assert!((agg.delta_exposure.unwrap() + 300.0).abs() < 1e-9);
        // theta: -2*10 - 1*20
        assert!((agg.theta_decay.unwrap() + 40.0).abs() < 1e-9);

        // volume momentum (30 - 10) / 40; the unsolved leg's volume is excluded
        assert!((agg.momentum_score.unwrap() - 0.5).abs() < 1e-9);
        // PCR 2.0 gives -1, a 5 point put skew gives -1:
        // -1*0.4 - 1*0.3 + 0.5*0.3
        assert!((agg.sentiment_score.unwrap() + 0.55).abs() < 1e-9);

        // 0.4*(10/30) + 0.4*2.0 + 0.2*(60/40) = 1.2333
        assert_eq!(agg.pcr_sentiment, Some(PcrSentiment::Bearish));
    }

    #[test]
    fn test_pcr_sentiment_bands() {
        assert_eq!(PcrSentiment::from_weighted_pcr(1.4), PcrSentiment::StrongBearish);
        assert_eq!(PcrSentiment::from_weighted_pcr(1.3), PcrSentiment::Bearish);
        assert_eq!(PcrSentiment::from_weighted_pcr(1.0), PcrSentiment::Neutral);
        assert_eq!(PcrSentiment::from_weighted_pcr(0.8), PcrSentiment::Bullish);
        assert_eq!(PcrSentiment::from_weighted_pcr(0.7), PcrSentiment::StrongBullish);
    }

    #[test]
    fn test_balanced_chain_is_neutral() {
        let result = AnalyticsEngine::default().compute(&snapshot(nifty_chain(100_000, 100_000)));
        let agg = &result.aggregates;
        assert_eq!(agg.momentum_score, Some(0.0));
        assert!(agg.sentiment_score.unwrap().abs() < 1e-3);
        assert!(agg.gamma_exposure.unwrap() > 0.0);
        assert_eq!(agg.pcr_sentiment, Some(PcrSentiment::Neutral));
    }

    #[test]
    fn test_greeks_can_be_disabled() {
        let engine = AnalyticsEngine::default().with_greeks(false);
        let result = engine.compute(&snapshot(nifty_chain(1, 1)));
        assert!(result
            .strikes
            .iter()
            .all(|s| s.call.as_ref().is_some_and(|l| l.greeks.is_none())));
        assert_eq!(result.aggregates.gamma_exposure, None);
        assert_eq!(result.aggregates.theta_decay, None);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let bad = SolverSettings {
            min_vol: 2.0,
            max_vol: 1.0,
            ..SolverSettings::default()
        };
        assert_matches!(AnalyticsEngine::new(bad), Err(MarketDataError::Configuration(_)));

        // Wider than the pricer supports
        for (min_vol, max_vol) in [(0.01, 8.0), (0.001, 1.0)] {
            let settings = SolverSettings {
                min_vol,
                max_vol,
                ..SolverSettings::default()
            };
            assert_matches!(
                AnalyticsEngine::new(settings),
                Err(MarketDataError::Configuration(_))
            );
        }
        assert!(AnalyticsEngine::new(SolverSettings::default()).is_ok());
    }
}
