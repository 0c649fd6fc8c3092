//! # Dead Man's Switch: Enforcement Thresholds and Cadence
//!
//! Pure rules deciding which enforcement thresholds are due for an open
//! stay at a given instant, and the recurring schedule that decides when
//! the evaluator runs.
//!
//! ## Thresholds
//!
//! With `d = stay_end_date - today` (UTC calendar days):
//!
//! | threshold              | due when                                   | needs DMS flag |
//! |------------------------|--------------------------------------------|----------------|
//! | `renewal_reminder`     | `0 < d <= 2`                               | yes            |
//! | `final_day`            | `d == 0`                                   | yes            |
//! | `last_day_shield`      | `d == 0` and Shield Mode off               | no             |
//! | `overstay_detected`    | `d < 0`                                    | no             |
//! | `post_end_enforcement` | `as_of > stay_end_date 00:00 UTC + 48h`    | yes            |
//!
//! `renewal_reminder` is due for the whole two-day window rather than only
//! at `d == 2`, so a run missed on that day is caught up by the next one.
//! Whether a threshold has already fired is not derived from time: the
//! caller consults the durable `(stay, threshold)` mark ledger.

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use stayguard_core::{Actor, Timestamp};
use stayguard_state::Stay;

use crate::audit::{AuditCategory, NewAuditEntry};
use crate::notify::NotificationKind;

/// Days before the end date at which the renewal reminder becomes due.
pub const RENEWAL_REMINDER_DAYS: i64 = 2;

/// Hours after the end date (00:00 UTC) before the property is enforced.
pub const POST_END_GRACE_HOURS: i64 = 48;

// ---------------------------------------------------------------------------
// EnforcementThreshold
// ---------------------------------------------------------------------------

/// A time-based rule that fires at most once per stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementThreshold {
    RenewalReminder,
    FinalDay,
    LastDayShield,
    OverstayDetected,
    PostEndEnforcement,
}

/// Side effect a threshold has on the stay's property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyEffect {
    /// Turn Shield Mode on.
    EnableShield,
    /// Shield Mode on and the utility lock flagged.
    EngageUtilityLock,
}

impl EnforcementThreshold {
    pub const ALL: [EnforcementThreshold; 5] = [
        Self::RenewalReminder,
        Self::FinalDay,
        Self::LastDayShield,
        Self::OverstayDetected,
        Self::PostEndEnforcement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RenewalReminder => "renewal_reminder",
            Self::FinalDay => "final_day",
            Self::LastDayShield => "last_day_shield",
            Self::OverstayDetected => "overstay_detected",
            Self::PostEndEnforcement => "post_end_enforcement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn property_effect(&self) -> Option<PropertyEffect> {
        match self {
            Self::LastDayShield => Some(PropertyEffect::EnableShield),
            Self::PostEndEnforcement => Some(PropertyEffect::EngageUtilityLock),
            _ => None,
        }
    }

    /// Notification sent to owner and guest after the threshold is recorded.
    pub fn notification_kind(&self) -> NotificationKind {
        match self {
            Self::RenewalReminder => NotificationKind::RenewalReminder,
            Self::FinalDay => NotificationKind::FinalDayAlert,
            Self::LastDayShield => NotificationKind::ShieldModeActivated,
            Self::OverstayDetected => NotificationKind::OverstayAlert,
            Self::PostEndEnforcement => NotificationKind::EnforcementExecuted,
        }
    }

    /// The single ledger entry recording this threshold firing for `stay`.
    pub fn audit_entry(&self, stay: &Stay, as_of: Timestamp) -> NewAuditEntry {
        let end = stay.stay_end_date;
        let (category, title, message) = match self {
            Self::RenewalReminder => (
                AuditCategory::DeadMansSwitch,
                "Dead Man's Switch: 48h before lease end",
                format!("Stay {}: lease ends {end}; renew-or-checkout alert sent to owner and guest.", stay.id),
            ),
            Self::FinalDay => (
                AuditCategory::DeadMansSwitch,
                "Dead Man's Switch: lease ends today",
                format!("Stay {}: urgent lease-ends-today alert sent to owner and guest.", stay.id),
            ),
            Self::LastDayShield => (
                AuditCategory::ShieldMode,
                "Shield Mode activated (last day of stay)",
                format!(
                    "Shield Mode activated for property {} (last day of stay {}).",
                    stay.property_id, stay.id
                ),
            ),
            Self::OverstayDetected => (
                AuditCategory::StatusChange,
                "Overstay occurred",
                format!(
                    "Overstay detected: stay {}, property {}, end date was {end}.",
                    stay.id, stay.property_id
                ),
            ),
            Self::PostEndEnforcement => (
                AuditCategory::DeadMansSwitch,
                "Dead Man's Switch: auto-executed",
                format!(
                    "Stay {}: still open {POST_END_GRACE_HOURS}h after lease end {end}. Property set to vacant-equivalent enforcement; utility lock flagged.",
                    stay.id
                ),
            ),
        };
        NewAuditEntry::new(category, title, message, Actor::system(), as_of)
            .with_property(stay.property_id)
            .with_stay(stay.id)
            .with_meta(serde_json::json!({
                "threshold": self.as_str(),
                "stay_end_date": end.to_string(),
            }))
    }
}

impl std::fmt::Display for EnforcementThreshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Thresholds due for `stay` at `as_of`, ignoring whether they already fired.
///
/// Terminal stays never have anything due.
pub fn due_thresholds(stay: &Stay, shield_on: bool, as_of: Timestamp) -> Vec<EnforcementThreshold> {
    let mut due = Vec::new();
    if !stay.is_open() {
        return due;
    }
    let days_until_end = stay.days_until_end(as_of.date());
    let dms = stay.dead_mans_switch_enabled;

    if dms && (1..=RENEWAL_REMINDER_DAYS).contains(&days_until_end) {
        due.push(EnforcementThreshold::RenewalReminder);
    }
    if dms && days_until_end == 0 {
        due.push(EnforcementThreshold::FinalDay);
    }
    if days_until_end == 0 && !shield_on {
        due.push(EnforcementThreshold::LastDayShield);
    }
    if days_until_end < 0 {
        due.push(EnforcementThreshold::OverstayDetected);
    }
    let enforce_after = Timestamp::start_of_day(stay.stay_end_date).plus_hours(POST_END_GRACE_HOURS);
    if dms && as_of > enforce_after {
        due.push(EnforcementThreshold::PostEndEnforcement);
    }
    due
}

// ---------------------------------------------------------------------------
// SchedulePattern: recurring evaluator cadence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulePattern {
    /// Every hour at minute 0.
    Hourly,
    /// Every day at `at_hour`:00 UTC.
    Daily,
}

/// When the enforcement evaluator runs.
///
/// `should_fire` is true once the current slot has started and the schedule
/// has not fired inside it yet, so a process that was down at the slot
/// boundary still runs once when it comes back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSchedule {
    pub schedule_id: String,
    pub description: String,
    pub pattern: SchedulePattern,
    /// Hour of day (UTC) for daily schedules.
    pub at_hour: u32,
    pub active: bool,
    pub last_fired: Option<DateTime<Utc>>,
}

impl CronSchedule {
    pub fn new(
        schedule_id: impl Into<String>,
        description: impl Into<String>,
        pattern: SchedulePattern,
    ) -> Self {
        Self {
            schedule_id: schedule_id.into(),
            description: description.into(),
            pattern,
            at_hour: 0,
            active: true,
            last_fired: None,
        }
    }

    /// Daily schedules only: run at `hour`:00 UTC (clamped to 0-23).
    pub fn at_hour(mut self, hour: u32) -> Self {
        self.at_hour = hour.min(23);
        self
    }

    /// Start of the slot containing `now`.
    pub fn slot_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let hour_start = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        match self.pattern {
            SchedulePattern::Hourly => hour_start,
            SchedulePattern::Daily => {
                let today_slot = hour_start.with_hour(self.at_hour).unwrap_or(hour_start);
                if today_slot > now {
                    today_slot - Duration::days(1)
                } else {
                    today_slot
                }
            }
        }
    }

    pub fn should_fire(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.last_fired {
            Some(last) => last < self.slot_start(now),
            None => true,
        }
    }

    pub fn mark_fired(&mut self, at: DateTime<Utc>) {
        self.last_fired = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use stayguard_core::{PropertyId, RegionCode, UserId};
    use stayguard_state::NewStay;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn stay(end: &str, dms: bool) -> Stay {
        Stay::create(
            NewStay {
                property_id: PropertyId::new(),
                owner_id: UserId::new(),
                guest_id: UserId::new(),
                guest_name: None,
                guest_email: None,
                invitation_id: None,
                stay_start_date: date("2026-07-01"),
                stay_end_date: date(end),
                region_code: RegionCode::new("TX").unwrap(),
                dead_mans_switch_enabled: dms,
            },
            at("2026-06-20T00:00:00Z"),
        )
        .unwrap()
    }

    use EnforcementThreshold::*;

    // -- Threshold rules -------------------------------------------------

    #[test]
    fn nothing_due_mid_stay() {
        assert!(due_thresholds(&stay("2026-07-10", true), false, at("2026-07-05T09:00:00Z")).is_empty());
    }

    #[test]
    fn renewal_reminder_window() {
        let s = stay("2026-07-10", true);
        assert_eq!(due_thresholds(&s, false, at("2026-07-08T09:00:00Z")), vec![RenewalReminder]);
        assert_eq!(due_thresholds(&s, false, at("2026-07-09T09:00:00Z")), vec![RenewalReminder]);
        assert!(due_thresholds(&s, false, at("2026-07-07T23:59:59Z")).is_empty());
    }

    #[test]
    fn final_day_turns_shield_on() {
        let s = stay("2026-07-10", true);
        assert_eq!(
            due_thresholds(&s, false, at("2026-07-10T09:00:00Z")),
            vec![FinalDay, LastDayShield]
        );
        assert_eq!(due_thresholds(&s, true, at("2026-07-10T09:00:00Z")), vec![FinalDay]);
    }

    #[test]
    fn overstay_then_enforcement_after_48h() {
        let s = stay("2026-07-10", true);
        assert_eq!(due_thresholds(&s, true, at("2026-07-11T09:00:00Z")), vec![OverstayDetected]);
        assert_eq!(due_thresholds(&s, true, at("2026-07-12T00:00:00Z")), vec![OverstayDetected]);
        assert_eq!(
            due_thresholds(&s, true, at("2026-07-12T00:00:01Z")),
            vec![OverstayDetected, PostEndEnforcement]
        );
    }

    #[test]
    fn disabled_switch_keeps_shield_and_overstay_only() {
        let s = stay("2026-07-10", false);
        assert!(due_thresholds(&s, false, at("2026-07-09T09:00:00Z")).is_empty());
        assert_eq!(due_thresholds(&s, false, at("2026-07-10T09:00:00Z")), vec![LastDayShield]);
        assert_eq!(due_thresholds(&s, true, at("2026-07-20T09:00:00Z")), vec![OverstayDetected]);
    }

    #[test]
    fn terminal_stays_have_nothing_due() {
        let mut s = stay("2026-07-10", true);
        s.revoke(&Actor::system(), at("2026-07-05T00:00:00Z")).unwrap();
        assert!(due_thresholds(&s, false, at("2026-07-20T09:00:00Z")).is_empty());
    }

    #[test]
    fn entries_use_the_right_categories() {
        let s = stay("2026-07-10", true);
        let now = at("2026-07-10T09:00:00Z");
        assert_eq!(RenewalReminder.audit_entry(&s, now).category, AuditCategory::DeadMansSwitch);
        assert_eq!(LastDayShield.audit_entry(&s, now).category, AuditCategory::ShieldMode);
        assert_eq!(OverstayDetected.audit_entry(&s, now).category, AuditCategory::StatusChange);
        let e = PostEndEnforcement.audit_entry(&s, now);
        assert_eq!(e.stay_id, Some(s.id));
        assert!(e.actor.user_id.is_none());
    }

    #[test]
    fn threshold_names_round_trip() {
        for t in EnforcementThreshold::ALL {
            assert_eq!(EnforcementThreshold::parse(t.as_str()), Some(t));
        }
    }

    // -- Cadence ---------------------------------------------------------

    #[test]
    fn daily_schedule_fires_once_per_slot() {
        let mut sched = CronSchedule::new("dms", "daily enforcement", SchedulePattern::Daily).at_hour(9);
        let t = Utc.with_ymd_and_hms(2026, 7, 10, 9, 0, 30).unwrap();
        assert!(sched.should_fire(t));
        sched.mark_fired(t);
        assert!(!sched.should_fire(t + Duration::hours(5)));
        assert!(!sched.should_fire(Utc.with_ymd_and_hms(2026, 7, 11, 8, 59, 0).unwrap()));
        assert!(sched.should_fire(Utc.with_ymd_and_hms(2026, 7, 11, 9, 0, 0).unwrap()));
    }

    #[test]
    fn missed_slot_is_caught_up() {
        let mut sched = CronSchedule::new("dms", "daily enforcement", SchedulePattern::Daily);
        sched.mark_fired(Utc.with_ymd_and_hms(2026, 7, 8, 0, 0, 5).unwrap());
        assert!(sched.should_fire(Utc.with_ymd_and_hms(2026, 7, 10, 14, 0, 0).unwrap()));
    }

    #[test]
    fn hourly_slot_start() {
        let sched = CronSchedule::new("dms", "hourly", SchedulePattern::Hourly);
        let t = Utc.with_ymd_and_hms(2026, 7, 10, 13, 45, 10).unwrap();
        assert_eq!(sched.slot_start(t), Utc.with_ymd_and_hms(2026, 7, 10, 13, 0, 0).unwrap());
    }

    #[test]
    fn inactive_schedule_never_fires() {
        let mut sched = CronSchedule::new("dms", "off", SchedulePattern::Hourly);
        sched.active = false;
        assert!(!sched.should_fire(Utc::now()));
    }
}
