//! Trading-timezone clock and session window helpers
//!
//! All trading logic runs on Korean Standard Time (Asia/Seoul). Korea has
//! no daylight saving, so KST is a fixed +09:00 offset.

use chrono::{DateTime, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};
use thiserror::Error;

/// Seconds east of UTC for Asia/Seoul
const KST_OFFSET_SECS: i32 = 9 * 3600;

#[derive(Debug, Error)]
pub enum TimeWindowError {
    #[error("invalid time format '{0}', expected HH:MM")]
    InvalidTime(String),

    #[error("invalid window format '{0}', expected HH:MM-HH:MM")]
    InvalidWindow(String),

    #[error("window start {start} is not before end {end}")]
    StartNotBeforeEnd { start: NaiveTime, end: NaiveTime },
}

/// The KST fixed offset
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(KST_OFFSET_SECS).expect("KST offset is valid")
}

/// Current time in KST
pub fn kst_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&kst())
}

/// Convert any timestamp to KST
pub fn to_kst<Tz: TimeZone>(dt: DateTime<Tz>) -> DateTime<FixedOffset> {
    dt.with_timezone(&kst())
}

/// Parse an "HH:MM" string into a NaiveTime
pub fn parse_hhmm(s: &str) -> Result<NaiveTime, TimeWindowError> {
    let (h, m) = s
        .split_once(':')
        .ok_or_else(|| TimeWindowError::InvalidTime(s.to_string()))?;
    let hour: u32 = h
        .parse()
        .map_err(|_| TimeWindowError::InvalidTime(s.to_string()))?;
    let minute: u32 = m
        .parse()
        .map_err(|_| TimeWindowError::InvalidTime(s.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| TimeWindowError::InvalidTime(s.to_string()))
}

/// An inclusive intraday time window ("HH:MM-HH:MM") in KST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self, TimeWindowError> {
        if start >= end {
            return Err(TimeWindowError::StartNotBeforeEnd { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse "HH:MM-HH:MM"
    pub fn parse(s: &str) -> Result<Self, TimeWindowError> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| TimeWindowError::InvalidWindow(s.to_string()))?;
        Self::new(parse_hhmm(a.trim())?, parse_hhmm(b.trim())?)
    }

    /// Whether the time-of-day of `dt` falls inside the window (inclusive)
    pub fn contains(&self, dt: DateTime<FixedOffset>) -> bool {
        let t = dt.time();
        t >= self.start && t <= self.end
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start.hour(),
            self.start.minute(),
            self.end.hour(),
            self.end.minute()
        )
    }
}

/// Whether `dt` falls inside any of the given session windows
pub fn in_any_window(dt: DateTime<FixedOffset>, windows: &[TimeWindow]) -> bool {
    windows.iter().any(|w| w.contains(dt))
}

/// Align a timestamp down to the open of its candle period.
///
/// Candle open times align to `floor(minute / unit) * unit` with seconds
/// zeroed, matching the venue's minute-candle convention.
pub fn align_to_candle_open(dt: DateTime<FixedOffset>, unit_minutes: u32) -> DateTime<FixedOffset> {
    let minute = dt.minute() - dt.minute() % unit_minutes;
    dt.with_minute(minute)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn kst_dt(h: u32, m: u32) -> DateTime<FixedOffset> {
        kst()
            .from_local_datetime(
                &NaiveDate::from_ymd_opt(2024, 3, 4)
                    .unwrap()
                    .and_hms_opt(h, m, 0)
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_kst_is_fixed_plus_nine() {
        assert_eq!(kst().local_minus_utc(), 9 * 3600);
    }

    #[test]
    fn test_parse_window() {
        let w = TimeWindow::parse("09:10-13:00").unwrap();
        assert_eq!(w.start, NaiveTime::from_hms_opt(9, 10, 0).unwrap());
        assert_eq!(w.end, NaiveTime::from_hms_opt(13, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_window_rejects_garbage() {
        assert!(TimeWindow::parse("0910-1300").is_err());
        assert!(TimeWindow::parse("25:00-26:00").is_err());
        assert!(TimeWindow::parse("13:00-09:10").is_err());
    }

    #[test]
    fn test_window_contains_is_inclusive() {
        let w = TimeWindow::parse("09:10-13:00").unwrap();
        assert!(w.contains(kst_dt(9, 10)));
        assert!(w.contains(kst_dt(11, 30)));
        assert!(w.contains(kst_dt(13, 0)));
        assert!(!w.contains(kst_dt(9, 9)));
        assert!(!w.contains(kst_dt(13, 1)));
    }

    #[test]
    fn test_in_any_window() {
        let windows = vec![
            TimeWindow::parse("09:10-13:00").unwrap(),
            TimeWindow::parse("17:10-19:00").unwrap(),
        ];
        assert!(in_any_window(kst_dt(10, 0), &windows));
        assert!(in_any_window(kst_dt(18, 0), &windows));
        assert!(!in_any_window(kst_dt(15, 0), &windows));
    }

    #[test]
    fn test_align_to_candle_open() {
        let aligned = align_to_candle_open(kst_dt(10, 17), 5);
        assert_eq!(aligned.minute(), 15);
        assert_eq!(aligned.second(), 0);

        let aligned = align_to_candle_open(kst_dt(10, 17), 15);
        assert_eq!(aligned.minute(), 15);

        let aligned = align_to_candle_open(kst_dt(10, 17), 60);
        assert_eq!(aligned.minute(), 0);
    }
}
