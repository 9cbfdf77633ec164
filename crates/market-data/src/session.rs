//! Exchange trading calendar
//!
//! Answers whether the regular session is open at a given instant. Session
//! boundaries are inclusive: both the opening and the closing minute count
//! as open.

use crate::error::MarketDataError;
use crate::Result;
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday,
};
use common::{Holiday, MarketStatus, SessionPhase};
use config::{parse_holiday_date, parse_time_of_day, parse_weekday, CalendarConfig};
use std::collections::BTreeMap;

/// Days searched ahead when looking for the next session
const LOOKAHEAD_DAYS: i64 = 400;

#[derive(Debug, Clone)]
pub struct MarketSession {
    exchange: String,
    offset: FixedOffset,
    trading_days: [bool; 7],
    session_start: NaiveTime,
    session_end: NaiveTime,
    pre_open_start: Option<NaiveTime>,
    post_close_end: Option<NaiveTime>,
    holidays: BTreeMap<NaiveDate, String>,
}

fn config_error(message: impl Into<String>) -> MarketDataError {
    MarketDataError::Configuration(message.into())
}

fn parse_time(field: &str, value: &str) -> Result<NaiveTime> {
    parse_time_of_day(value)
        .ok_or_else(|| config_error(format!("{}: invalid time '{}', expected HH:MM", field, value)))
}

impl MarketSession {
    /// Build a session from calendar configuration
    pub fn new(cfg: &CalendarConfig) -> Result<Self> {
        let offset = FixedOffset::east_opt(cfg.utc_offset_minutes * 60).ok_or_else(|| {
            config_error(format!("UTC offset out of range: {} minutes", cfg.utc_offset_minutes))
        })?;

        let mut trading_days = [false; 7];
        for day in &cfg.trading_days {
            let weekday = parse_weekday(day)
                .ok_or_else(|| config_error(format!("invalid trading day '{}'", day)))?;
            trading_days[weekday.num_days_from_monday() as usize] = true;
        }
        if !trading_days.iter().any(|d| *d) {
            return Err(config_error("at least one trading day is required"));
        }

        let session_start = parse_time("session_start", &cfg.session_start)?;
        let session_end = parse_time("session_end", &cfg.session_end)?;
        if session_start >= session_end {
            return Err(config_error(format!(
                "session_start ({}) must be before session_end ({})",
                cfg.session_start, cfg.session_end
            )));
        }

        let pre_open_start = cfg
            .pre_open_start
            .as_deref()
            .map(|t| parse_time("pre_open_start", t))
            .transpose()?;
        if pre_open_start.is_some_and(|t| t > session_start) {
            return Err(config_error("pre_open_start must not be after session_start"));
        }

        let post_close_end = cfg
            .post_close_end
            .as_deref()
            .map(|t| parse_time("post_close_end", t))
            .transpose()?;
        if post_close_end.is_some_and(|t| t < session_end) {
            return Err(config_error("post_close_end must not be before session_end"));
        }

        let mut holidays = BTreeMap::new();
        for holiday in &cfg.holidays {
            let date = parse_holiday_date(&holiday.date)
                .ok_or_else(|| config_error(format!("invalid holiday date '{}'", holiday.date)))?;
            holidays.insert(date, holiday.name.clone().unwrap_or_else(|| "Holiday".to_string()));
        }

        Ok(Self {
            exchange: cfg.exchange.clone(),
            offset,
            trading_days,
            session_start,
            session_end,
            pre_open_start,
            post_close_end,
            holidays,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Exchange-local time for an instant
    pub fn local_time(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.offset)
    }

    /// Whether a local calendar date is a trading day (weekday and not a holiday)
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        self.is_trading_weekday(date.weekday()) && !self.holidays.contains_key(&date)
    }

    fn is_trading_weekday(&self, weekday: Weekday) -> bool {
        self.trading_days[weekday.num_days_from_monday() as usize]
    }

    pub fn holiday_name(&self, date: NaiveDate) -> Option<&str> {
        self.holidays.get(&date).map(String::as_str)
    }

    pub fn phase(&self, now: DateTime<Utc>) -> SessionPhase {
        let local = self.local_time(now);
        if !self.is_trading_day(local.date_naive()) {
            return SessionPhase::Closed;
        }

        let t = local.time();
        if self.session_start <= t && t <= self.session_end {
            SessionPhase::Regular
        } else if self.pre_open_start.is_some_and(|p| p <= t && t < self.session_start) {
            SessionPhase::PreOpen
        } else if self.post_close_end.is_some_and(|p| self.session_end < t && t <= p) {
            SessionPhase::PostClose
        } else {
            SessionPhase::Closed
        }
    }

    /// Only the regular session counts as open
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == SessionPhase::Regular
    }

    pub fn status(&self, now: DateTime<Utc>) -> MarketStatus {
        let phase = self.phase(now);
        let is_open = phase == SessionPhase::Regular;
        let today = self.local_time(now).date_naive();

        let (next_open, next_close) = if is_open {
            (
                self.next_session_after(today).map(|(open, _)| open),
                self.to_utc(today, self.session_end),
            )
        } else {
            match self.next_session_from(now) {
                Some((open, close)) => (Some(open), Some(close)),
                None => (None, None),
            }
        };

        MarketStatus {
            exchange: self.exchange.clone(),
            is_open,
            phase,
            current_time: now,
            next_open,
            next_close,
            holiday: self.holidays.get(&today).map(|name| Holiday {
                date: today,
                name: name.clone(),
            }),
        }
    }

    fn to_utc(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn session_on(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((
            self.to_utc(date, self.session_start)?,
            self.to_utc(date, self.session_end)?,
        ))
    }

    /// First session on a trading day strictly after `date`
    fn next_session_after(&self, date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        (1..=LOOKAHEAD_DAYS)
            .map(|d| date + Duration::days(d))
            .find(|d| self.is_trading_day(*d))
            .and_then(|d| self.session_on(d))
    }

    /// First session that opens after `now` (today's, if it has not started)
    fn next_session_from(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let today = self.local_time(now).date_naive();
        if self.is_trading_day(today) {
            if let Some((open, close)) = self.session_on(today) {
                if now < open {
                    return Some((open, close));
                }
            }
        }
        self.next_session_after(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use config::HolidayEntry;

    /// 2025-09-10 is a Wednesday; IST = UTC+05:30
    fn ist(day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(330 * 60)
            .unwrap()
            .with_ymd_and_hms(2025, 9, day, hour, minute, second)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn nse() -> MarketSession {
        let mut cfg = CalendarConfig::default();
        cfg.holidays.push(HolidayEntry {
            date: "2025-09-11".to_string(),
            name: Some("Test Holiday".to_string()),
        });
        MarketSession::new(&cfg).unwrap()
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let session = nse();
        assert!(!session.is_open(ist(10, 9, 14, 59)));
        assert!(session.is_open(ist(10, 9, 15, 0)));
        assert!(session.is_open(ist(10, 12, 0, 0)));
        assert!(session.is_open(ist(10, 15, 30, 0)));
        assert!(!session.is_open(ist(10, 15, 30, 1)));
    }

    #[test]
    fn test_phases() {
        let session = nse();
        assert_eq!(session.phase(ist(10, 8, 59, 0)), SessionPhase::Closed);
        assert_eq!(session.phase(ist(10, 9, 0, 0)), SessionPhase::PreOpen);
        assert_eq!(session.phase(ist(10, 9, 15, 0)), SessionPhase::Regular);
        assert_eq!(session.phase(ist(10, 15, 45, 0)), SessionPhase::PostClose);
        assert_eq!(session.phase(ist(10, 16, 0, 0)), SessionPhase::PostClose);
        assert_eq!(session.phase(ist(10, 16, 0, 1)), SessionPhase::Closed);
    }

    #[test]
    fn test_weekends_closed() {
        let session = nse();
        // 2025-09-13 Saturday, 2025-09-14 Sunday
        assert!(!session.is_open(ist(13, 11, 0, 0)));
        assert!(!session.is_open(ist(14, 11, 0, 0)));
        assert_eq!(session.phase(ist(13, 9, 5, 0)), SessionPhase::Closed);
    }

    #[test]
    fn test_holiday_closed() {
        let session = nse();
        assert!(!session.is_open(ist(11, 11, 0, 0)));
        let date = NaiveDate::from_ymd_opt(2025, 9, 11).unwrap();
        assert!(!session.is_trading_day(date));
        assert_eq!(session.holiday_name(date), Some("Test Holiday"));

        let status = session.status(ist(11, 11, 0, 0));
        assert_eq!(status.holiday.map(|h| h.name), Some("Test Holiday".to_string()));
    }

    #[test]
    fn test_status_while_open() {
        let session = nse();
        let status = session.status(ist(10, 10, 0, 0));
        assert!(status.is_open);
        assert_eq!(status.exchange, "NSE");
        assert_eq!(status.next_close, Some(ist(10, 15, 30, 0)));
        // Thursday is a holiday, so the next open is Friday
        assert_eq!(status.next_open, Some(ist(12, 9, 15, 0)));
    }

    #[test]
    fn test_status_before_open_and_after_close() {
        let session = nse();

        let before = session.status(ist(10, 7, 0, 0));
        assert!(!before.is_open);
        assert_eq!(before.next_open, Some(ist(10, 9, 15, 0)));
        assert_eq!(before.next_close, Some(ist(10, 15, 30, 0)));

        // Friday evening rolls over the weekend to Monday
        let friday_evening = session.status(ist(12, 18, 0, 0));
        assert_eq!(friday_evening.next_open, Some(ist(15, 9, 15, 0)));
    }

    #[test]
    fn test_invalid_calendar_rejected() {
        let mut cfg = CalendarConfig::default();
        cfg.session_start = "16:00".to_string();
        assert_matches!(MarketSession::new(&cfg), Err(MarketDataError::Configuration(_)));

        let mut cfg = CalendarConfig::default();
        cfg.trading_days = vec![];
        assert_matches!(MarketSession::new(&cfg), Err(MarketDataError::Configuration(_)));

        let mut cfg = CalendarConfig::default();
        cfg.utc_offset_minutes = 100_000;
        assert_matches!(MarketSession::new(&cfg), Err(MarketDataError::Configuration(_)));

        let mut cfg = CalendarConfig::default();
        cfg.holidays.push(HolidayEntry {
            date: "tomorrow".to_string(),
            name: None,
        });
        assert_matches!(MarketSession::new(&cfg), Err(MarketDataError::Configuration(_)));

        let mut cfg = CalendarConfig::default();
        cfg.session_end = "4pm".to_string();
        assert_matches!(MarketSession::new(&cfg), Err(MarketDataError::Configuration(_)));
    }
}
