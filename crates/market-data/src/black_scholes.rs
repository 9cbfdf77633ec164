use crate::types::{BSInputs, Greeks, IvSolution, SolverSettings, UnsolvedReason};
use common::OptionType;
use std::f64::consts::PI;

pub const MIN_TIME: f64 = 1.0 / (365.25 * 24.0 * 3600.0);
pub const MIN_VOL: f64 = config::VOLATILITY_FLOOR;
pub const MAX_VOL: f64 = config::VOLATILITY_CEILING;

/// Vega below this is treated as flat and the solver bisects instead
const MIN_VEGA: f64 = 1e-10;

pub fn norm_pdf(x: f64) -> f64 {
    (1.0 / (2.0 * PI).sqrt()) * (-0.5 * x * x).exp()
}

pub fn norm_cdf(x: f64) -> f64 {
    let k = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = k * (0.319381530
        + k * (-0.356563782
        + k * (1.781477937
        + k * (-1.821255978
        + k * 1.330274429))));

    let approx = 1.0 - norm_pdf(x) * poly;

    if x >= 0.0 {
        approx
    } else {
        1.0 - approx
    }
}

pub fn d1_d2(input: &BSInputs) -> (f64, f64) {
    let s = input.spot;
    let k = input.strike;
    let t = input.time.max(1e-6);
    let v = input.vol.max(1e-6);
    let r = input.rate;

    let d1 = ((s / k).ln() + (r + 0.5 * v * v) * t) / (v * t.sqrt());
    let d2 = d1 - v * t.sqrt();

    (d1, d2)
}

pub fn black_scholes_price(mut input: BSInputs) -> f64 {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let s = input.spot;
    let k = input.strike;
    let t = input.time;
    let r = input.rate;

    let price = match input.option_type {
        OptionType::Call => s * norm_cdf(d1) - k * (-r * t).exp() * norm_cdf(d2),
        OptionType::Put => k * (-r * t).exp() * norm_cdf(-d2) - s * norm_cdf(-d1),
    };

    price.max(0.0)
}

pub fn intrinsic_value(spot: f64, strike: f64, option_type: OptionType) -> f64 {
    match option_type {
        OptionType::Call => (spot - strike).max(0.0),
        OptionType::Put => (strike - spot).max(0.0),
    }
}

/// No-arbitrage price bounds `(lower, upper)` for a European option
pub fn price_bounds(input: &BSInputs) -> (f64, f64) {
    let t = input.time.max(MIN_TIME);
    let discounted_strike = input.strike * (-input.rate * t).exp();
    match input.option_type {
        OptionType::Call => ((input.spot - discounted_strike).max(0.0), input.spot),
        OptionType::Put => ((discounted_strike - input.spot).max(0.0), discounted_strike),
    }
}

pub fn black_scholes_greeks(mut input: BSInputs) -> Greeks {
    input.validate();

    let (d1, d2) = d1_d2(&input);
    let s = input.spot;
    let k = input.strike;
    let t = input.time;
    let v = input.vol;
    let r = input.rate;

    let pdf = norm_pdf(d1);
    let sqrt_t = t.sqrt();

    let delta = match input.option_type {
        OptionType::Call => norm_cdf(d1),
        OptionType::Put => norm_cdf(d1) - 1.0,
    };

    let gamma = pdf / (s * v * sqrt_t);

    let vega = s * pdf * sqrt_t;

    let theta = match input.option_type {
        OptionType::Call => {
            -(s * pdf * v) / (2.0 * sqrt_t) - r * k * (-r * t).exp() * norm_cdf(d2)
        }
        OptionType::Put => {
            -(s * pdf * v) / (2.0 * sqrt_t) + r * k * (-r * t).exp() * norm_cdf(-d2)
        }
    };

    let rho = match input.option_type {
        OptionType::Call => k * t * (-r * t).exp() * norm_cdf(d2),
        OptionType::Put => -k * t * (-r * t).exp() * norm_cdf(-d2),
    };

    Greeks {
        delta,
        gamma,
        vega,
        theta,
        rho,
    }
}

/// Solve for the volatility that reproduces `market_price`.
///
/// Newton steps on vega inside `[min_vol, max_vol]`; whenever a step would
/// leave the bracket, or vega is flat, the solver bisects instead. Each
/// evaluation narrows the bracket, so the search always terminates.
pub fn implied_volatility(
    market_price: f64,
    mut input: BSInputs,
    settings: &SolverSettings,
) -> IvSolution {
    if !market_price.is_finite() || market_price <= 0.0 {
        return IvSolution::Unsolved {
            reason: UnsolvedReason::NonPositivePrice,
        };
    }

    let (lower, upper) = price_bounds(&input);
    if market_price < lower - settings.tolerance {
        return IvSolution::Unsolved {
            reason: UnsolvedReason::BelowIntrinsic,
        };
    }
    if market_price >= upper {
        return IvSolution::Unsolved {
            reason: UnsolvedReason::AboveUpperBound,
        };
    }

    let mut price_at = |vol: f64| {
        input.vol = vol;
        black_scholes_price(input) - market_price
    };

    let mut lo = settings.min_vol;
    let mut hi = settings.max_vol;
    let f_lo = price_at(lo);
    let f_hi = price_at(hi);

    if f_lo.abs() <= settings.tolerance {
        return IvSolution::Solved { iv: lo, iterations: 0 };
    }
    if f_hi.abs() <= settings.tolerance {
        return IvSolution::Solved { iv: hi, iterations: 0 };
    }
    if f_lo > 0.0 || f_hi < 0.0 {
        return IvSolution::Unsolved {
            reason: UnsolvedReason::NotBracketed,
        };
    }

    let mut vol = settings.initial_guess.clamp(lo, hi);

    for iteration in 1..=settings.max_iterations {
        input.vol = vol;
        let diff = black_scholes_price(input) - market_price;

        if diff.abs() <= settings.tolerance {
            return IvSolution::Solved {
                iv: vol,
                iterations: iteration,
            };
        }

        // Price is increasing in vol, so the sign says which side the root is on
        if diff > 0.0 {
            hi = vol;
        } else {
            lo = vol;
        }

        let vega = black_scholes_greeks(input).vega;
        let newton = vol - diff / vega;

        vol = if vega > MIN_VEGA && newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }

    IvSolution::Unsolved {
        reason: UnsolvedReason::MaxIterations,
    }
}
