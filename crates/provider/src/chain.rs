//! Strike ladder, expiry and freshness helpers shared by providers

use crate::error::{ProviderError, ProviderResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use common::{OptionChainSnapshot, OptionType};
use std::collections::BTreeMap;

/// ATM strike: spot rounded to the nearest strike step
pub fn atm_strike(spot: f64, step: f64) -> f64 {
    (spot / step).round() * step
}

/// Strikes `atm - n*step ..= atm + n*step`, ascending, positive only
pub fn strike_ladder(atm: f64, step: f64, each_side: u32) -> Vec<f64> {
    let n = each_side as i64;
    (-n..=n)
        .map(|i| atm + i as f64 * step)
        .filter(|strike| *strike > 0.0)
        .collect()
}

/// Strike step for a symbol, or `InvalidSymbol`
pub fn strike_step(steps: &BTreeMap<String, f64>, symbol: &str) -> ProviderResult<f64> {
    steps
        .get(symbol)
        .copied()
        .filter(|s| *s > 0.0)
        .ok_or_else(|| ProviderError::InvalidSymbol(symbol.to_string()))
}

/// Reject snapshots older than `threshold` at `now`
pub fn check_freshness(
    snapshot: &OptionChainSnapshot,
    now: DateTime<Utc>,
    threshold: std::time::Duration,
) -> ProviderResult<()> {
    let age = snapshot.age(now).to_std().unwrap_or_default();
    if age > threshold {
        return Err(ProviderError::StaleData {
            symbol: snapshot.symbol().to_string(),
            age,
            threshold,
        });
    }
    Ok(())
}

/// Exchange quote key of an index's spot price
pub fn spot_instrument(symbol: &str) -> Option<&'static str> {
    match symbol {
        "NIFTY" => Some("NSE:NIFTY 50"),
        "BANKNIFTY" => Some("NSE:NIFTY BANK"),
        "FINNIFTY" => Some("NSE:NIFTY FIN SERVICE"),
        "MIDCPNIFTY" => Some("NSE:NIFTY MID SELECT"),
        _ => None,
    }
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut date = first_of_next - Duration::days(1);
    while date.weekday() != weekday {
        date -= Duration::days(1);
    }
    Some(date)
}

/// Monthly expiry: the last `weekday` of the month, rolling to next month
/// once this month's has passed
pub fn monthly_expiry(today: NaiveDate, weekday: Weekday) -> Option<NaiveDate> {
    let this_month = last_weekday_of_month(today.year(), today.month(), weekday)?;
    if this_month >= today {
        return Some(this_month);
    }
    let (year, month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    last_weekday_of_month(year, month, weekday)
}

/// Monthly contract trading symbol, e.g. `NIFTY25SEP24800CE`
pub fn trading_symbol(
    underlying: &str,
    expiry: NaiveDate,
    strike: f64,
    option_type: OptionType,
) -> String {
    let strike = if strike.fract() == 0.0 {
        format!("{}", strike as i64)
    } else {
        format!("{}", strike)
    };
    format!(
        "{}{}{}{}",
        underlying,
        expiry.format("%y%b").to_string().to_uppercase(),
        strike,
        option_type.suffix()
    )
}
