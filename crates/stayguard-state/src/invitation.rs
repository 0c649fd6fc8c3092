//! # Invitation Lifecycle State Machine
//!
//! An invitation is an owner's offer of a stay. The guest accepts it with
//! the invitation code and a completed e-signature; acceptance produces the
//! stay.
//!
//! ```text
//! Pending ──▶ Accepted   (guest, within 12h, signature present, no overlap)
//!    │
//!    └──────▶ Cancelled  (owner, from Pending including its Expired view)
//! ```
//!
//! `Expired` is never stored. It is the read-time view of a pending
//! invitation whose acceptance window has passed.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stayguard_core::{
    Actor, InvitationCode, InvitationId, LifecycleError, PropertyId, RegionCode, Timestamp, UserId,
};

use crate::stay::{NewStay, Stay};

/// Hours a pending invitation stays acceptable.
pub const ACCEPTANCE_WINDOW_HOURS: i64 = 12;

const ENTITY: &str = "invitation";

/// The stored status of an invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Cancelled,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The status an invitation presents to readers at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationView {
    Pending,
    Accepted,
    Cancelled,
    Expired,
}

/// Owner input for a new invitation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvitation {
    pub property_id: PropertyId,
    pub owner_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: RegionCode,
}

/// Guest input when accepting an invitation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub guest_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    /// Opaque e-signature completion token. Required, never interpreted.
    pub signature_id: String,
}

/// Record of an invitation transition.
#[derive(Debug, Clone, Serialize)]
pub struct InvitationTransition {
    pub invitation_id: InvitationId,
    pub code: InvitationCode,
    pub property_id: PropertyId,
    pub from_state: &'static str,
    pub to_state: &'static str,
    pub at: Timestamp,
    pub actor: Actor,
}

/// An owner's offer of a stay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    pub code: InvitationCode,
    pub property_id: PropertyId,
    pub owner_id: UserId,
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    pub region_code: RegionCode,
    status: InvitationStatus,
    pub dead_mans_switch_enabled: bool,
    pub signature_id: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl Invitation {
    /// Create a pending invitation with a fresh code.
    ///
    /// # Errors
    ///
    /// `PreconditionFailed` unless checkout is after checkin and any guest
    /// name given is non-blank.
    pub fn create(draft: NewInvitation, now: Timestamp) -> Result<Self, LifecycleError> {
        if draft.stay_end_date <= draft.stay_start_date {
            return Err(LifecycleError::precondition(
                "checkout date must be after checkin date",
            ));
        }
        if draft
            .guest_name
            .as_deref()
            .is_some_and(|name| name.trim().is_empty())
        {
            return Err(LifecycleError::precondition("guest name must not be blank"));
        }
        Ok(Self {
            id: InvitationId::new(),
            code: InvitationCode::generate(),
            property_id: draft.property_id,
            owner_id: draft.owner_id,
            guest_name: draft.guest_name,
            guest_email: draft.guest_email,
            stay_start_date: draft.stay_start_date,
            stay_end_date: draft.stay_end_date,
            region_code: draft.region_code,
            status: InvitationStatus::Pending,
            dead_mans_switch_enabled: true,
            signature_id: None,
            created_at: now,
            resolved_at: None,
        })
    }

    /// Rehydrate an invitation from storage.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: InvitationId,
        code: InvitationCode,
        draft: NewInvitation,
        status: InvitationStatus,
        dead_mans_switch_enabled: bool,
        signature_id: Option<String>,
        created_at: Timestamp,
        resolved_at: Option<Timestamp>,
    ) -> Self {
        Self {
            id,
            code,
            property_id: draft.property_id,
            owner_id: draft.owner_id,
            guest_name: draft.guest_name,
            guest_email: draft.guest_email,
            stay_start_date: draft.stay_start_date,
            stay_end_date: draft.stay_end_date,
            region_code: draft.region_code,
            status,
            dead_mans_switch_enabled,
            signature_id,
            created_at,
            resolved_at,
        }
    }

    /// The stored status.
    pub fn status(&self) -> InvitationStatus {
        self.status
    }

    /// End of the acceptance window.
    pub fn expires_at(&self) -> Timestamp {
        self.created_at.plus_hours(ACCEPTANCE_WINDOW_HOURS)
    }

    /// The status as presented at `now`.
    pub fn view_status(&self, now: Timestamp) -> InvitationView {
        match self.status {
            InvitationStatus::Pending if now > self.expires_at() => InvitationView::Expired,
            InvitationStatus::Pending => InvitationView::Pending,
            InvitationStatus::Accepted => InvitationView::Accepted,
            InvitationStatus::Cancelled => InvitationView::Cancelled,
        }
    }

    /// Guest accepts the invitation (PENDING → ACCEPTED).
    ///
    /// `property_stays` are the stays already recorded for the property; an
    /// open one overlapping this invitation's dates blocks acceptance.
    /// Returns the draft of the stay to create alongside the transition.
    pub fn accept(
        &mut self,
        acceptance: Acceptance,
        property_stays: &[Stay],
        actor: &Actor,
        now: Timestamp,
    ) -> Result<(InvitationTransition, NewStay), LifecycleError> {
        self.require_pending()?;
        if now > self.expires_at() {
            return Err(LifecycleError::Expired {
                code: self.code.to_string(),
                expired_at: self.expires_at(),
            });
        }
        if acceptance.signature_id.trim().is_empty() {
            return Err(LifecycleError::precondition(
                "a completed e-signature is required to accept an invitation",
            ));
        }
        if let Some(conflict) = property_stays
            .iter()
            .find(|s| s.overlaps(self.stay_start_date, self.stay_end_date))
        {
            return Err(LifecycleError::precondition(format!(
                "property already has an open stay ({}) overlapping {} to {}",
                conflict.id, self.stay_start_date, self.stay_end_date
            )));
        }

        if self.guest_name.is_none() {
            self.guest_name = acceptance.guest_name;
        }
        if acceptance.guest_email.is_some() {
            self.guest_email = acceptance.guest_email;
        }
        self.signature_id = Some(acceptance.signature_id);
        let transition = self.apply(InvitationStatus::Accepted, actor, now);
        let stay = NewStay {
            property_id: self.property_id,
            owner_id: self.owner_id,
            guest_id: acceptance.guest_id,
            guest_name: self.guest_name.clone(),
            guest_email: self.guest_email.clone(),
            invitation_id: Some(self.id),
            stay_start_date: self.stay_start_date,
            stay_end_date: self.stay_end_date,
            region_code: self.region_code.clone(),
            dead_mans_switch_enabled: self.dead_mans_switch_enabled,
        };
        Ok((transition, stay))
    }

    /// Owner cancels the invitation (PENDING → CANCELLED). Expired
    /// invitations are still pending and may be cancelled.
    pub fn cancel(
        &mut self,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<InvitationTransition, LifecycleError> {
        self.require_pending()?;
        Ok(self.apply(InvitationStatus::Cancelled, actor, now))
    }

    fn require_pending(&self) -> Result<(), LifecycleError> {
        if self.status != InvitationStatus::Pending {
            return Err(LifecycleError::AlreadyResolved {
                entity: ENTITY,
                id: self.code.to_string(),
                state: self.status.as_str().to_uppercase(),
            });
        }
        Ok(())
    }

    fn apply(&mut self, to: InvitationStatus, actor: &Actor, now: Timestamp) -> InvitationTransition {
        let from = self.status;
        self.status = to;
        self.resolved_at = Some(now);
        InvitationTransition {
            invitation_id: self.id,
            code: self.code.clone(),
            property_id: self.property_id,
            from_state: from.as_str(),
            to_state: to.as_str(),
            at: now,
            actor: actor.clone(),
        }
    }
}
