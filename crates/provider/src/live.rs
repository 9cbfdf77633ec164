//! Kite-style REST provider
//!
//! Spot prices come from `/quote/ltp` and option legs from `/quote` on the
//! monthly contracts around the ATM strike. Requests are rate limited and
//! transient failures are retried with exponential backoff.

use crate::chain::{
    atm_strike, check_freshness, monthly_expiry, spot_instrument, strike_ladder, strike_step,
    trading_symbol,
};
use crate::error::{ProviderError, ProviderResult};
use crate::traits::DataProvider;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use common::{
    HealthReport, HealthStatus, OptionChainSnapshot, OptionQuote, OptionType, STRIKE_EPSILON,
};
use config::{parse_weekday, LiveProviderConfig, ProviderConfig};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// IST, the exchange timezone for quote timestamps
const IST_OFFSET_SECONDS: i32 = 330 * 60;
const KITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Retry-After fallback when the header is missing
const DEFAULT_RETRY_AFTER_SECS: u64 = 1;
/// Consecutive request failures before the provider reports unhealthy
const UNHEALTHY_AFTER: u32 = 3;
/// Characters of an upstream body kept in error messages
const BODY_PREVIEW_CHARS: usize = 200;

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LtpEntry {
    last_price: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct QuoteEntry {
    last_price: f64,
    #[serde(default)]
    volume: u64,
    #[serde(default)]
    oi: f64,
    #[serde(default)]
    timestamp: Option<String>,
}

/// Parse an exchange-local `YYYY-MM-DD HH:MM:SS` timestamp
pub fn parse_kite_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw, KITE_TIMESTAMP_FORMAT).ok()?;
    FixedOffset::east_opt(IST_OFFSET_SECONDS)?
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Minimum spacing between requests
#[derive(Debug)]
struct RateLimiter {
    min_interval: Duration,
    last: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    fn new(requests_per_second: f64) -> Self {
        let min_interval = if requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            last: tokio::sync::Mutex::new(None),
        }
    }

    async fn acquire(&self) {
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let next = previous + self.min_interval;
            if Instant::now() < next {
                tokio::time::sleep_until(next).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[derive(Debug, Default)]
struct RequestStats {
    last_success_time: Option<DateTime<Utc>>,
    last_failure_time: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    last_error: Option<String>,
}

impl RequestStats {
    fn record(&mut self, outcome: &Result<(), String>) {
        let now = Utc::now();
        match outcome {
            Ok(()) => {
                self.last_success_time = Some(now);
                self.consecutive_failures = 0;
                self.total_successes += 1;
            }
            Err(e) => {
                self.last_failure_time = Some(now);
                self.consecutive_failures += 1;
                self.total_failures += 1;
                self.last_error = Some(e.clone());
            }
        }
    }

    fn status(&self) -> HealthStatus {
        match self.consecutive_failures {
            0 => HealthStatus::Healthy,
            n if n < UNHEALTHY_AFTER => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        }
    }
}

/// REST provider for Kite Connect compatible APIs
#[derive(Debug)]
pub struct LiveProvider {
    name: String,
    client: Client,
    base_url: String,
    auth_header: String,
    max_retries: u32,
    initial_backoff: Duration,
    expiry_weekday: Weekday,
    exchange_offset: FixedOffset,
    derivatives_exchange: String,
    strike_steps: BTreeMap<String, f64>,
    strikes_each_side: u32,
    freshness_threshold: Duration,
    limiter: RateLimiter,
    stats: Mutex<RequestStats>,
}

impl LiveProvider {
    pub fn from_config(cfg: &ProviderConfig) -> ProviderResult<Self> {
        let live: &LiveProviderConfig = cfg.live.as_ref().ok_or_else(|| {
            ProviderError::ProviderUnavailable("live provider settings are missing".to_string())
        })?;

        let expiry_weekday = parse_weekday(&live.expiry_weekday).ok_or_else(|| {
            ProviderError::ProviderUnavailable(format!(
                "invalid expiry weekday '{}'",
                live.expiry_weekday
            ))
        })?;

        let exchange_offset = FixedOffset::east_opt(IST_OFFSET_SECONDS).ok_or_else(|| {
            ProviderError::ProviderUnavailable("invalid exchange offset".to_string())
        })?;

        let client = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| ProviderError::ProviderUnavailable(e.to_string()))?;

        Ok(Self {
            name: "live".to_string(),
            client,
            base_url: live.base_url.trim_end_matches('/').to_string(),
            auth_header: format!("token {}:{}", live.api_key, live.access_token),
            max_retries: live.max_retries,
            initial_backoff: Duration::from_millis(live.initial_backoff_ms),
            expiry_weekday,
            exchange_offset,
            derivatives_exchange: live.derivatives_exchange.clone(),
            strike_steps: cfg.strike_steps.clone(),
            strikes_each_side: cfg.strikes_each_side,
            freshness_threshold: Duration::from_secs(cfg.freshness_threshold_seconds),
            limiter: RateLimiter::new(live.requests_per_second),
            stats: Mutex::new(RequestStats::default()),
        })
    }

    /// GET an endpoint with `i=` instrument parameters, retrying transient failures
    async fn get<T: DeserializeOwned>(&self, path: &str, instruments: &[String]) -> ProviderResult<T> {
        let result = self.get_with_retry(path, instruments).await;
        self.stats
            .lock()
            .record(&result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        result
    }

    async fn get_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        instruments: &[String],
    ) -> ProviderResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let query: Vec<(&str, &str)> = instruments.iter().map(|i| ("i", i.as_str())).collect();
        let mut backoff = self.initial_backoff;

        for attempt in 0..=self.max_retries {
            self.limiter.acquire().await;

            let request = self
                .client
                .get(&url)
                .query(&query)
                .header("X-Kite-Version", "3")
                .header("Authorization", &self.auth_header);

            let failure = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| ProviderError::ProviderUnavailable(e.to_string()))?;
                    return parse_envelope(&text);
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
                    if attempt < self.max_retries {
                        warn!(
                            "Rate limited on {}, waiting {} seconds (attempt {}/{})",
                            path,
                            retry_after,
                            attempt + 1,
                            self.max_retries
                        );
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }
                    format!("rate limited on {}", path)
                }
                Ok(response)
                    if response.status() == StatusCode::UNAUTHORIZED
                        || response.status() == StatusCode::FORBIDDEN =>
                {
                    return Err(ProviderError::ProviderUnavailable(format!(
                        "authentication rejected ({})",
                        response.status()
                    )));
                }
                Ok(response) if response.status().is_server_error() => {
                    format!("HTTP {} from {}", response.status(), path)
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::ProviderUnavailable(format!(
                        "HTTP {}: {}",
                        status,
                        body_preview(&body)
                    )));
                }
                Err(e) => e.to_string(),
            };

            if attempt < self.max_retries {
                warn!(
                    "Request failed: {} (attempt {}/{}), retrying in {:?}",
                    failure,
                    attempt + 1,
                    self.max_retries,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            } else {
                return Err(ProviderError::ProviderUnavailable(failure));
            }
        }

        Err(ProviderError::ProviderUnavailable(format!(
            "retries exhausted for {}",
            path
        )))
    }

    async fn fetch_spot(&self, symbol: &str) -> ProviderResult<f64> {
        let instrument = spot_instrument(symbol)
            .ok_or_else(|| ProviderError::InvalidSymbol(symbol.to_string()))?
            .to_string();
        let data: HashMap<String, LtpEntry> = self.get("/quote/ltp", &[instrument.clone()]).await?;
        data.get(&instrument)
            .map(|entry| entry.last_price)
            .filter(|price| *price > 0.0)
            .ok_or_else(|| ProviderError::InvalidSymbol(symbol.to_string()))
    }

    /// Monthly expiry date and its closing instant
    fn expiry_for(&self, now: DateTime<Utc>) -> ProviderResult<(NaiveDate, DateTime<Utc>)> {
        let today = now.with_timezone(&self.exchange_offset).date_naive();
        let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap_or_default();

        let date = monthly_expiry(today, self.expiry_weekday)
            .ok_or_else(|| ProviderError::ProviderUnavailable("cannot resolve expiry".to_string()))?;
        let at = self
            .exchange_offset
            .from_local_datetime(&date.and_time(close))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ProviderError::ProviderUnavailable("cannot resolve expiry".to_string()))?;
        Ok((date, at))
    }
}

/// Leading characters of a response body, cut on a char boundary
fn body_preview(text: &str) -> String {
    text.chars().take(BODY_PREVIEW_CHARS).collect()
}

fn parse_envelope<T: DeserializeOwned>(text: &str) -> ProviderResult<T> {
    let envelope: Envelope<T> = serde_json::from_str(text).map_err(|e| {
        ProviderError::ProviderUnavailable(format!(
            "JSON parse error: {} (body: {})",
            e,
            body_preview(text)
        ))
    })?;
    if envelope.status != "success" {
        return Err(ProviderError::ProviderUnavailable(
            envelope.message.unwrap_or_else(|| "request failed".to_string()),
        ));
    }
    envelope
        .data
        .ok_or_else(|| ProviderError::ProviderUnavailable("response has no data".to_string()))
}

/// Legs found in a `/quote` response, plus the newest quote timestamp
fn collect_quotes(
    legs: &[(String, f64, OptionType)],
    data: &HashMap<String, QuoteEntry>,
) -> (Vec<OptionQuote>, Option<DateTime<Utc>>) {
    let mut quotes = Vec::with_capacity(legs.len());
    let mut newest: Option<DateTime<Utc>> = None;

    for (key, strike, option_type) in legs {
        let Some(entry) = data.get(key) else {
            debug!(instrument = %key, "Leg missing from quote response");
            continue;
        };
        if let Some(ts) = entry.timestamp.as_deref().and_then(parse_kite_timestamp) {
            newest = Some(newest.map_or(ts, |n| n.max(ts)));
        }
        quotes.push(OptionQuote::new(
            *strike,
            *option_type,
            entry.last_price.max(0.0),
            entry.oi.max(0.0) as u64,
            entry.volume,
        ));
    }
    (quotes, newest)
}

#[async_trait]
impl DataProvider for LiveProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_atm(&self, symbol: &str) -> ProviderResult<f64> {
        let step = strike_step(&self.strike_steps, symbol)?;
        let spot = self.fetch_spot(symbol).await?;
        Ok(atm_strike(spot, step))
    }

    async fn fetch_overview(&self, symbol: &str) -> ProviderResult<OptionChainSnapshot> {
        let step = strike_step(&self.strike_steps, symbol)?;
        let spot = self.fetch_spot(symbol).await?;
        let atm = atm_strike(spot, step);
        let now = Utc::now();
        let (expiry_date, expiry) = self.expiry_for(now)?;

        let legs: Vec<(String, f64, OptionType)> = strike_ladder(atm, step, self.strikes_each_side)
            .into_iter()
            .flat_map(|strike| {
                [OptionType::Call, OptionType::Put].map(|option_type| {
                    (
                        format!(
                            "{}:{}",
                            self.derivatives_exchange,
                            trading_symbol(symbol, expiry_date, strike, option_type)
                        ),
                        strike,
                        option_type,
                    )
                })
            })
            .collect();
        let instruments: Vec<String> = legs.iter().map(|(key, _, _)| key.clone()).collect();

        let data: HashMap<String, QuoteEntry> = self.get("/quote", &instruments).await?;
        let (mut quotes, newest) = collect_quotes(&legs, &data);

        // Without the ATM leg the chain has no anchor
        if !quotes.is_empty() && !quotes.iter().any(|q| (q.strike - atm).abs() < STRIKE_EPSILON) {
            warn!(symbol, atm, "ATM leg missing from quote response, returning empty chain");
            quotes.clear();
        }

        let snapshot = OptionChainSnapshot::new(symbol, newest.unwrap_or(now), spot, expiry, atm, quotes)
            .map_err(|e| ProviderError::ProviderUnavailable(e.to_string()))?;
        check_freshness(&snapshot, now, self.freshness_threshold)?;
        Ok(snapshot)
    }

    async fn check_health(&self) -> HealthReport {
        let stats = self.stats.lock();
        HealthReport {
            status: stats.status(),
            last_success_time: stats.last_success_time,
            last_failure_time: stats.last_failure_time,
            consecutive_failures: stats.consecutive_failures,
            total_successes: stats.total_successes,
            total_failures: stats.total_failures,
            last_error: stats.last_error.clone(),
            ..HealthReport::new(&self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_kite_timestamp_is_ist() {
        let ts = parse_kite_timestamp("2025-09-10 10:00:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 9, 10, 4, 30, 0).unwrap());
        assert!(parse_kite_timestamp("10/09/2025").is_none());
    }

    #[test]
    fn test_envelope_success_and_error() {
        let ok = r#"{"status":"success","data":{"NSE:NIFTY 50":{"instrument_token":256265,"last_price":24812.4}}}"#;
        let data: HashMap<String, LtpEntry> = parse_envelope(ok).unwrap();
        assert_eq!(data["NSE:NIFTY 50"].last_price, 24812.4);

        let err = r#"{"status":"error","message":"Incorrect `api_key` or `access_token`.","error_type":"TokenException"}"#;
        assert_matches!(
            parse_envelope::<HashMap<String, LtpEntry>>(err),
            Err(ProviderError::ProviderUnavailable(m)) if m.contains("access_token")
        );

        assert_matches!(
            parse_envelope::<HashMap<String, LtpEntry>>("<html>"),
            Err(ProviderError::ProviderUnavailable(_))
        );
    }

    #[test]
    fn test_unparseable_multibyte_body_is_truncated() {
        // 199 ASCII bytes then a three-byte rupee sign straddling the cut
        let body = format!("{}\u{20b9} not json", "x".repeat(199));
        let err = parse_envelope::<HashMap<String, LtpEntry>>(&body).unwrap_err();
        assert_matches!(err, ProviderError::ProviderUnavailable(m) if m.contains('\u{20b9}'));

        let preview = body_preview(&"\u{20b9}".repeat(300));
        assert_eq!(preview.chars().count(), BODY_PREVIEW_CHARS);
    }

    #[test]
    fn test_envelope_without_data() {
        assert_matches!(
            parse_envelope::<HashMap<String, LtpEntry>>(r#"{"status":"success"}"#),
            Err(ProviderError::ProviderUnavailable(m)) if m.contains("no data")
        );
    }

    #[test]
    fn test_collect_quotes_skips_missing_legs() {
        let body = r#"{"status":"success","data":{
            "NFO:NIFTY25SEP24800CE":{"last_price":120.5,"volume":1500,"oi":250000,"timestamp":"2025-09-10 10:00:01"},
            "NFO:NIFTY25SEP24800PE":{"last_price":98.0,"volume":900,"oi":310000,"timestamp":"2025-09-10 10:00:03"}
        }}"#;
        let data: HashMap<String, QuoteEntry> = parse_envelope(body).unwrap();
        let legs = vec![
            ("NFO:NIFTY25SEP24800CE".to_string(), 24800.0, OptionType::Call),
            ("NFO:NIFTY25SEP24800PE".to_string(), 24800.0, OptionType::Put),
            ("NFO:NIFTY25SEP24850CE".to_string(), 24850.0, OptionType::Call),
        ];

        let (quotes, newest) = collect_quotes(&legs, &data);
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[1].open_interest, 310_000);
        assert_eq!(newest, Some(Utc.with_ymd_and_hms(2025, 9, 10, 4, 30, 3).unwrap()));
    }

    #[test]
    fn test_missing_live_section() {
        let cfg = ProviderConfig::default();
        assert_matches!(
            LiveProvider::from_config(&cfg),
            Err(ProviderError::ProviderUnavailable(_))
        );
    }

    #[test]
    fn test_request_stats_status() {
        let mut stats = RequestStats::default();
        assert_eq!(stats.status(), HealthStatus::Healthy);
        stats.record(&Err("timeout".to_string()));
        assert_eq!(stats.status(), HealthStatus::Degraded);
        stats.record(&Err("timeout".to_string()));
        stats.record(&Err("timeout".to_string()));
        assert_eq!(stats.status(), HealthStatus::Unhealthy);
        stats.record(&Ok(()));
        assert_eq!(stats.status(), HealthStatus::Healthy);
        assert_eq!(stats.total_failures, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_spaces_requests() {
        let limiter = RateLimiter::new(2.0);
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
