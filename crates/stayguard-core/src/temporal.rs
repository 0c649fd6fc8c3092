//! # Temporal Types: UTC-Only Timestamps and Clocks
//!
//! Defines [`Timestamp`], a UTC-only instant truncated to seconds, and the
//! [`Clock`] trait through which the rest of the workspace reads "now".
//!
//! ## Calendar Days
//!
//! Stay boundaries are calendar dates (`NaiveDate`). "Today" is always the
//! UTC calendar date of the clock, never a local date, so every process
//! evaluating the same instant agrees on which stays are active.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A UTC timestamp truncated to seconds precision.
///
/// Serializes as RFC 3339 and renders with a `Z` suffix
/// (e.g., `2026-03-01T09:00:00Z`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated to seconds.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Wrap a `DateTime<Utc>`, discarding sub-second precision.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Midnight UTC at the start of the given calendar date.
    pub fn start_of_day(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Parse an RFC 3339 string. Only the `Z` suffix is accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimestamp`] for malformed input or
    /// an explicit offset (including `+00:00`).
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !s.ends_with('Z') {
            return Err(ValidationError::InvalidTimestamp(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        Self::parse_lenient(s)
    }

    /// Parse an RFC 3339 string with any offset, converting to UTC.
    pub fn parse_lenient(s: &str) -> Result<Self, ValidationError> {
        let dt = DateTime::parse_from_rfc3339(s).map_err(|e| {
            ValidationError::InvalidTimestamp(format!("invalid RFC 3339 timestamp {s:?}: {e}"))
        })?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The UTC calendar date this instant falls on.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// This instant shifted by `hours` (negative values move backwards).
    pub fn plus_hours(&self, hours: i64) -> Self {
        Self(self.0 + Duration::hours(hours))
    }

    /// This instant shifted by `secs` seconds.
    pub fn plus_seconds(&self, secs: i64) -> Self {
        Self(self.0 + Duration::seconds(secs))
    }

    /// Unix epoch seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// Render as ISO 8601 with `Z` suffix.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::from_utc(dt)
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

/// Signed number of calendar days from `from` to `to`.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Source of the current instant.
///
/// Services and the enforcement evaluator read time only through this
/// trait. Tests and operator replays inject a [`FixedClock`].
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant.
    fn now(&self) -> Timestamp;

    /// The current UTC calendar date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    instant: Arc<RwLock<Timestamp>>,
}

impl FixedClock {
    /// A clock frozen at `at`.
    pub fn new(at: Timestamp) -> Self {
        Self {
            instant: Arc::new(RwLock::new(at)),
        }
    }

    /// Move the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        *self.instant.write() = at;
    }

    /// Advance the clock by `hours`.
    pub fn advance_hours(&self, hours: i64) {
        let mut guard = self.instant.write();
        *guard = guard.plus_hours(hours);
    }

    /// Advance the clock by `secs` seconds.
    pub fn advance_seconds(&self, secs: i64) {
        let mut guard = self.instant.write();
        *guard = guard.plus_seconds(secs);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.instant.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn now_has_no_subsecond_component() {
        assert_eq!(Timestamp::now().as_datetime().nanosecond(), 0);
    }

    #[test]
    fn parse_rejects_offsets() {
        assert!(Timestamp::parse("2026-03-01T09:00:00Z").is_ok());
        assert!(Timestamp::parse("2026-03-01T09:00:00+00:00").is_err());
        assert!(Timestamp::parse("not a time").is_err());
    }

    #[test]
    fn parse_lenient_converts_to_utc() {
        let ts = Timestamp::parse_lenient("2026-03-01T09:00:00+02:00").unwrap();
        assert_eq!(ts.to_iso8601(), "2026-03-01T07:00:00Z");
    }

    #[test]
    fn date_is_the_utc_calendar_day() {
        let ts = Timestamp::from_utc(Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 59).unwrap());
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(ts.plus_seconds(1).date(), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }

    #[test]
    fn start_of_day_is_midnight() {
        let d = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(Timestamp::start_of_day(d).to_iso8601(), "2026-03-01T00:00:00Z");
    }

    #[test]
    fn fixed_clock_clones_share_time() {
        let t0 = Timestamp::parse("2026-03-01T09:00:00Z").unwrap();
        let clock = FixedClock::new(t0);
        let other = clock.clone();
        clock.advance_hours(12);
        assert_eq!(other.now(), t0.plus_hours(12));
        other.advance_seconds(1);
        assert_eq!(clock.now().to_iso8601(), "2026-03-01T21:00:01Z");
    }

    #[test]
    fn days_between_is_signed() {
        let a = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        assert_eq!(days_between(a, b), 30);
        assert_eq!(days_between(b, a), -30);
    }
}
