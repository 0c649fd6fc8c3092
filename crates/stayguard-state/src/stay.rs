//! # Stay Lifecycle State Machine
//!
//! A stay is the occupancy license a guest holds once an invitation is
//! accepted.
//!
//! ## States
//!
//! ```text
//!          ┌──▶ Completed   (guest ends an active stay)
//!          │
//! Open ────┼──▶ Cancelled   (guest cancels before the start date)
//!          │
//!          └──▶ Revoked     (owner revokes; vacate_by = revoked_at + 12h)
//!                  │
//!                  └── vacated_at (guest confirms leaving; stays Revoked)
//! ```
//!
//! `Open` has derived sub-phases for reads: upcoming, active and
//! overstayed. None of them are stored.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stayguard_core::{
    days_between, Actor, InvitationId, LifecycleError, PropertyId, RegionCode, StayId, Timestamp,
    UserId,
};

/// Hours between revocation and the vacate deadline.
pub const VACATE_GRACE_HOURS: i64 = 12;

const ENTITY: &str = "stay";

// ─── Stay Status ─────────────────────────────────────────────────────

/// The stored lifecycle state of a stay.
///
/// Each terminal variant holds the timestamp of the transition that reached
/// it, so at most one terminal marker can ever exist for a stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StayStatus {
    /// Authorized and not yet resolved.
    Open,
    /// The guest checked out.
    Completed { checked_out_at: Timestamp },
    /// The guest cancelled before the start date.
    Cancelled { cancelled_at: Timestamp },
    /// The owner revoked authorization. `vacated_at` records the guest
    /// acknowledging departure during the grace window.
    Revoked {
        revoked_at: Timestamp,
        vacated_at: Option<Timestamp>,
    },
}

impl StayStatus {
    /// Rebuild a status from its column representation.
    ///
    /// Returns `None` when more than one terminal marker is set, or when
    /// `vacated_at` is set without `revoked_at`.
    pub fn from_markers(
        checked_out_at: Option<Timestamp>,
        cancelled_at: Option<Timestamp>,
        revoked_at: Option<Timestamp>,
        vacated_at: Option<Timestamp>,
    ) -> Option<Self> {
        match (checked_out_at, cancelled_at, revoked_at, vacated_at) {
            (None, None, None, None) => Some(Self::Open),
            (Some(at), None, None, None) => Some(Self::Completed { checked_out_at: at }),
            (None, Some(at), None, None) => Some(Self::Cancelled { cancelled_at: at }),
            (None, None, Some(at), vacated_at) => Some(Self::Revoked {
                revoked_at: at,
                vacated_at,
            }),
            _ => None,
        }
    }

    /// State name, e.g. `"REVOKED"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Completed { .. } => "COMPLETED",
            Self::Cancelled { .. } => "CANCELLED",
            Self::Revoked { .. } => "REVOKED",
        }
    }

    /// Whether the stay has been resolved.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Open)
    }

    pub fn checked_out_at(&self) -> Option<Timestamp> {
        match self {
            Self::Completed { checked_out_at } => Some(*checked_out_at),
            _ => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<Timestamp> {
        match self {
            Self::Cancelled { cancelled_at } => Some(*cancelled_at),
            _ => None,
        }
    }

    pub fn revoked_at(&self) -> Option<Timestamp> {
        match self {
            Self::Revoked { revoked_at, .. } => Some(*revoked_at),
            _ => None,
        }
    }

    pub fn vacated_at(&self) -> Option<Timestamp> {
        match self {
            Self::Revoked { vacated_at, .. } => *vacated_at,
            _ => None,
        }
    }

    /// The vacate deadline. Present exactly when the stay is revoked.
    pub fn vacate_by(&self) -> Option<Timestamp> {
        self.revoked_at().map(|at| at.plus_hours(VACATE_GRACE_HOURS))
    }
}

impl std::fmt::Display for StayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read-time view of a stay relative to a calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StayPhase {
    /// Open, start date in the future.
    Upcoming,
    /// Open, between start and end date inclusive.
    Active,
    /// Open, end date in the past.
    Overstayed,
    Completed,
    Cancelled,
    Revoked,
}

// ─── Transitions ─────────────────────────────────────────────────────

/// What a successful stay transition did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayEvent {
    CheckedOut,
    Cancelled,
    Revoked { vacate_by: Timestamp },
    Vacated,
    UsatTokenReleased,
}

/// Record of a stay transition, consumed by the audit ledger.
#[derive(Debug, Clone, Serialize)]
pub struct StayTransition {
    pub stay_id: StayId,
    pub property_id: PropertyId,
    pub event: StayEvent,
    pub from_state: &'static str,
    pub to_state: &'static str,
    pub at: Timestamp,
    pub actor: Actor,
}

// ─── Stay ────────────────────────────────────────────────────────────

/// Inputs for a new stay, usually copied from an accepted invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStay {
    pub property_id: PropertyId,
    pub owner_id: UserId,
    pub guest_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub invitation_id: Option<InvitationId>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: RegionCode,
    pub dead_mans_switch_enabled: bool,
}

/// An occupancy license for one guest at one property.
///
/// Dates are never mutated after creation. The status only changes through
/// the transition methods below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub id: StayId,
    pub property_id: PropertyId,
    pub owner_id: UserId,
    pub guest_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub invitation_id: Option<InvitationId>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: RegionCode,
    status: StayStatus,
    pub dead_mans_switch_enabled: bool,
    pub usat_token_released_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Stay {
    /// Create an open stay.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` unless the end date is after the start date.
    pub fn create(draft: NewStay, now: Timestamp) -> Result<Self, LifecycleError> {
        if draft.stay_end_date <= draft.stay_start_date {
            return Err(LifecycleError::precondition(
                "stay end date must be after the start date",
            ));
        }
        Ok(Self::restore(StayId::new(), draft, StayStatus::Open, None, now))
    }

    /// Rehydrate a stay from storage.
    pub fn restore(
        id: StayId,
        draft: NewStay,
        status: StayStatus,
        usat_token_released_at: Option<Timestamp>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            property_id: draft.property_id,
            owner_id: draft.owner_id,
            guest_id: draft.guest_id,
            guest_name: draft.guest_name,
            guest_email: draft.guest_email,
            invitation_id: draft.invitation_id,
            stay_start_date: draft.stay_start_date,
            stay_end_date: draft.stay_end_date,
            region_code: draft.region_code,
            status,
            dead_mans_switch_enabled: draft.dead_mans_switch_enabled,
            usat_token_released_at,
            created_at,
        }
    }

    pub fn status(&self) -> StayStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == StayStatus::Open
    }

    /// `ceil(end - start)` in days. Dates are whole days, so no rounding.
    pub fn duration_days(&self) -> i64 {
        days_between(self.stay_start_date, self.stay_end_date)
    }

    /// Days from `today` to the end date (negative once past it).
    pub fn days_until_end(&self, today: NaiveDate) -> i64 {
        days_between(today, self.stay_end_date)
    }

    /// Whether this stay makes its property occupied on `today`.
    pub fn occupies(&self, today: NaiveDate) -> bool {
        self.is_open() && self.stay_start_date <= today
    }

    /// Whether this open stay's date range intersects `[start, end)`.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.is_open() && self.stay_start_date < end && start < self.stay_end_date
    }

    pub fn phase(&self, today: NaiveDate) -> StayPhase {
        match self.status {
            StayStatus::Completed { .. } => StayPhase::Completed,
            StayStatus::Cancelled { .. } => StayPhase::Cancelled,
            StayStatus::Revoked { .. } => StayPhase::Revoked,
            StayStatus::Open if self.stay_start_date > today => StayPhase::Upcoming,
            StayStatus::Open if self.stay_end_date < today => StayPhase::Overstayed,
            StayStatus::Open => StayPhase::Active,
        }
    }

    /// Guest ends the stay (OPEN → COMPLETED).
    pub fn end(&mut self, actor: &Actor, now: Timestamp) -> Result<StayTransition, LifecycleError> {
        self.require_open()?;
        if self.stay_start_date > now.date() {
            return Err(self.invalid(
                "COMPLETED",
                "stay has not started yet; cancel it instead",
            ));
        }
        Ok(self.apply(
            StayStatus::Completed { checked_out_at: now },
            StayEvent::CheckedOut,
            actor,
            now,
        ))
    }

    /// Guest confirms leaving a revoked stay. The stay stays REVOKED; a
    /// second confirmation is `AlreadyResolved`.
    pub fn vacate(&mut self, actor: &Actor, now: Timestamp) -> Result<StayTransition, LifecycleError> {
        match self.status {
            StayStatus::Revoked {
                revoked_at,
                vacated_at: None,
            } => Ok(self.apply(
                StayStatus::Revoked {
                    revoked_at,
                    vacated_at: Some(now),
                },
                StayEvent::Vacated,
                actor,
                now,
            )),
            StayStatus::Open => Err(self.invalid("REVOKED", "only a revoked stay can be vacated")),
            _ => Err(self.already_resolved()),
        }
    }

    /// Guest cancels a future stay (OPEN → CANCELLED).
    pub fn cancel(&mut self, actor: &Actor, now: Timestamp) -> Result<StayTransition, LifecycleError> {
        self.require_open()?;
        if self.stay_start_date <= now.date() {
            return Err(self.invalid(
                "CANCELLED",
                "stay has already started; end it instead",
            ));
        }
        Ok(self.apply(
            StayStatus::Cancelled { cancelled_at: now },
            StayEvent::Cancelled,
            actor,
            now,
        ))
    }

    /// Owner revokes authorization (OPEN → REVOKED).
    pub fn revoke(&mut self, actor: &Actor, now: Timestamp) -> Result<StayTransition, LifecycleError> {
        self.require_open()?;
        let status = StayStatus::Revoked {
            revoked_at: now,
            vacated_at: None,
        };
        let vacate_by = now.plus_hours(VACATE_GRACE_HOURS);
        Ok(self.apply(status, StayEvent::Revoked { vacate_by }, actor, now))
    }

    /// Owner releases the property's utility-access token to this stay.
    pub fn release_usat_token(
        &mut self,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<StayTransition, LifecycleError> {
        self.require_open()?;
        if self.usat_token_released_at.is_some() {
            return Err(self.invalid("OPEN", "utility access token already released"));
        }
        self.usat_token_released_at = Some(now);
        Ok(self.apply(self.status, StayEvent::UsatTokenReleased, actor, now))
    }

    fn require_open(&self) -> Result<(), LifecycleError> {
        if self.status.is_terminal() {
            return Err(self.already_resolved());
        }
        Ok(())
    }

    fn already_resolved(&self) -> LifecycleError {
        LifecycleError::AlreadyResolved {
            entity: ENTITY,
            id: self.id.to_string(),
            state: self.status.name().to_string(),
        }
    }

    fn invalid(&self, to: &str, reason: &str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            entity: ENTITY,
            from: self.status.name().to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }

    fn apply(
        &mut self,
        to: StayStatus,
        event: StayEvent,
        actor: &Actor,
        now: Timestamp,
    ) -> StayTransition {
        let from_state = self.status.name();
        self.status = to;
        StayTransition {
            stay_id: self.id,
            property_id: self.property_id,
            event,
            from_state,
            to_state: to.name(),
            at: now,
            actor: actor.clone(),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn draft(start: &str, end: &str) -> NewStay {
        NewStay {
            property_id: PropertyId::new(),
            owner_id: UserId::new(),
            guest_id: UserId::new(),
            guest_name: Some("Guest".into()),
            guest_email: None,
            invitation_id: None,
            stay_start_date: date(start),
            stay_end_date: date(end),
            region_code: RegionCode::new("NYC").unwrap(),
            dead_mans_switch_enabled: true,
        }
    }

    fn open_stay() -> Stay {
        Stay::create(draft("2026-03-01", "2026-03-10"), at("2026-02-20T10:00:00Z")).unwrap()
    }

    fn guest(stay: &Stay) -> Actor {
        Actor::guest(stay.guest_id)
    }

    fn owner(stay: &Stay) -> Actor {
        Actor::owner(stay.owner_id)
    }

    // ── Creation ─────────────────────────────────────────────────────

    #[test]
    fn test_create_requires_end_after_start() {
        let err = Stay::create(draft("2026-03-10", "2026-03-10"), Timestamp::now()).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::PreconditionFailed);
    }

    #[test]
    fn test_new_stay_is_open() {
        let stay = open_stay();
        assert!(stay.is_open());
        assert_eq!(stay.duration_days(), 9);
        assert!(stay.status().vacate_by().is_none());
    }

    // ── Happy paths ──────────────────────────────────────────────────

    #[test]
    fn test_end_active_stay() {
        let mut stay = open_stay();
        let now = at("2026-03-05T18:00:00Z");
        let t = stay.end(&guest(&stay), now).unwrap();
        assert_eq!(t.event, StayEvent::CheckedOut);
        assert_eq!((t.from_state, t.to_state), ("OPEN", "COMPLETED"));
        assert_eq!(stay.status().checked_out_at(), Some(now));
    }

    #[test]
    fn test_cancel_future_stay() {
        let mut stay = open_stay();
        let t = stay.cancel(&guest(&stay), at("2026-02-28T23:59:59Z")).unwrap();
        assert_eq!(t.to_state, "CANCELLED");
        assert!(stay.status().cancelled_at().is_some());
    }

    #[test]
    fn test_revoke_sets_vacate_by_twelve_hours_later() {
        let mut stay = open_stay();
        let now = at("2026-03-04T08:30:00Z");
        let t = stay.revoke(&owner(&stay), now).unwrap();
        assert_eq!(
            t.event,
            StayEvent::Revoked {
                vacate_by: at("2026-03-04T20:30:00Z")
            }
        );
        assert_eq!(stay.status().vacate_by(), Some(at("2026-03-04T20:30:00Z")));
    }

    #[test]
    fn test_release_usat_token_once() {
        let mut stay = open_stay();
        let now = at("2026-03-02T08:00:00Z");
        stay.release_usat_token(&owner(&stay), now).unwrap();
        assert_eq!(stay.usat_token_released_at, Some(now));
        let err = stay.release_usat_token(&owner(&stay), now).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::InvalidTransition);
        assert!(stay.is_open());
    }

    // ── Guard rails ──────────────────────────────────────────────────

    #[test]
    fn test_cannot_end_before_start() {
        let mut stay = open_stay();
        let err = stay.end(&guest(&stay), at("2026-02-28T12:00:00Z")).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::InvalidTransition);
        assert!(stay.is_open());
    }

    #[test]
    fn test_cannot_cancel_started_stay() {
        let mut stay = open_stay();
        let err = stay.cancel(&guest(&stay), at("2026-03-01T00:00:00Z")).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_second_revoke_is_already_resolved() {
        let mut stay = open_stay();
        let now = at("2026-03-04T08:30:00Z");
        stay.revoke(&owner(&stay), now).unwrap();
        let snapshot = stay.clone();
        let err = stay.revoke(&owner(&stay), now.plus_hours(1)).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::AlreadyResolved);
        assert_eq!(stay, snapshot);
    }

    #[test]
    fn test_vacate_after_revoke_keeps_revoked() {
        let mut stay = open_stay();
        let revoked_at = at("2026-03-04T08:30:00Z");
        stay.revoke(&owner(&stay), revoked_at).unwrap();
        let err = stay.end(&guest(&stay), revoked_at.plus_hours(1)).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::AlreadyResolved);

        let t = stay.vacate(&guest(&stay), revoked_at.plus_hours(3)).unwrap();
        assert_eq!(t.event, StayEvent::Vacated);
        assert_eq!(stay.status().name(), "REVOKED");
        assert_eq!(stay.status().revoked_at(), Some(revoked_at));
        assert_eq!(stay.status().vacated_at(), Some(revoked_at.plus_hours(3)));
        assert!(stay.status().checked_out_at().is_none());

        let err = stay.vacate(&guest(&stay), revoked_at.plus_hours(4)).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::AlreadyResolved);
    }

    #[test]
    fn test_open_stay_cannot_be_vacated() {
        let mut stay = open_stay();
        let err = stay.vacate(&guest(&stay), at("2026-03-04T08:30:00Z")).unwrap_err();
        assert_eq!(err.kind(), stayguard_core::ErrorKind::InvalidTransition);
    }

    #[test]
    fn test_terminal_stays_reject_everything() {
        let mut stay = open_stay();
        stay.end(&guest(&stay), at("2026-03-05T10:00:00Z")).unwrap();
        let now = at("2026-03-05T11:00:00Z");
        assert!(stay.end(&guest(&stay), now).is_err());
        assert!(stay.cancel(&guest(&stay), now).is_err());
        assert!(stay.revoke(&owner(&stay), now).is_err());
        assert!(stay.release_usat_token(&owner(&stay), now).is_err());
    }

    // ── Derived reads ────────────────────────────────────────────────

    #[test]
    fn test_phases() {
        let stay = open_stay();
        assert_eq!(stay.phase(date("2026-02-28")), StayPhase::Upcoming);
        assert_eq!(stay.phase(date("2026-03-01")), StayPhase::Active);
        assert_eq!(stay.phase(date("2026-03-10")), StayPhase::Active);
        assert_eq!(stay.phase(date("2026-03-11")), StayPhase::Overstayed);
    }

    #[test]
    fn test_occupancy_and_overlap() {
        let stay = open_stay();
        assert!(!stay.occupies(date("2026-02-28")));
        assert!(stay.occupies(date("2026-03-01")));
        assert!(stay.overlaps(date("2026-03-09"), date("2026-03-12")));
        assert!(!stay.overlaps(date("2026-03-10"), date("2026-03-12")));
        assert!(!stay.overlaps(date("2026-02-20"), date("2026-03-01")));
    }

    #[test]
    fn test_from_markers_rejects_two_terminals() {
        let t = at("2026-03-04T08:30:00Z");
        assert_eq!(
            StayStatus::from_markers(None, None, None, None),
            Some(StayStatus::Open)
        );
        assert!(StayStatus::from_markers(Some(t), None, Some(t), None).is_none());
        assert!(StayStatus::from_markers(None, None, None, Some(t)).is_none());
    }

    #[test]
    fn test_status_serialization_is_tagged() {
        let status = StayStatus::Cancelled {
            cancelled_at: at("2026-03-01T00:00:00Z"),
        };
        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["state"], "CANCELLED");
    }

    // ── Properties ───────────────────────────────────────────────────

    #[derive(Debug, Clone, Copy)]
    enum Op {
        End,
        Cancel,
        Revoke,
        Vacate,
        Release,
    }

    fn op() -> impl Strategy<Value = (Op, i64)> {
        (
            prop_oneof![
                Just(Op::End),
                Just(Op::Cancel),
                Just(Op::Revoke),
                Just(Op::Vacate),
                Just(Op::Release)
            ],
            0i64..(24 * 20),
        )
    }

    proptest! {
        #[test]
        fn terminal_markers_never_coexist(ops in proptest::collection::vec(op(), 0..12)) {
            let mut stay = open_stay();
            let base = at("2026-02-25T00:00:00Z");
            for (op, hours) in ops {
                let now = base.plus_hours(hours);
                let actor = Actor::system();
                let before = stay.status();
                let result = match op {
                    Op::End => stay.end(&actor, now),
                    Op::Cancel => stay.cancel(&actor, now),
                    Op::Revoke => stay.revoke(&actor, now),
                    Op::Vacate => stay.vacate(&actor, now),
                    Op::Release => stay.release_usat_token(&actor, now),
                };
                if result.is_err() {
                    prop_assert_eq!(stay.status(), before);
                }
                let s = stay.status();
                let markers = [
                    s.checked_out_at().is_some(),
                    s.cancelled_at().is_some(),
                    s.revoked_at().is_some(),
                ];
                prop_assert!(markers.iter().filter(|m| **m).count() <= 1);
                prop_assert_eq!(s.vacate_by().is_some(), s.revoked_at().is_some());
                if let (Some(r), Some(v)) = (s.revoked_at(), s.vacate_by()) {
                    prop_assert_eq!(v.epoch_secs() - r.epoch_secs(), 12 * 3600);
                }
            }
        }
    }
}
