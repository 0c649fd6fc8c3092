//! # Property and Shield Mode
//!
//! Occupancy is never stored: a property is occupied on a given day iff one
//! of its stays is open and has started. Shield Mode display status is
//! derived the same way.
//!
//! Shield Mode control is asymmetric. The owner may only turn it off; it is
//! turned on by the enforcement evaluator on a stay's last day or when a
//! stay is more than 48 hours past its end date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use stayguard_core::{Actor, LifecycleError, PropertyId, RegionCode, Timestamp, UserId};

use crate::stay::Stay;

const ENTITY: &str = "shield_mode";

/// Owner input when registering a property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProperty {
    pub owner_id: UserId,
    pub owner_email: Option<String>,
    pub name: String,
    pub region_code: RegionCode,
    /// The owner lives at the property.
    #[serde(default)]
    pub owner_occupied: bool,
}

/// A property as far as the lifecycle core cares about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub id: PropertyId,
    pub owner_id: UserId,
    pub owner_email: Option<String>,
    pub name: String,
    pub region_code: RegionCode,
    /// The owner lives at the property; guests may be single lodgers.
    #[serde(default)]
    pub owner_occupied: bool,
    pub shield_mode_enabled: bool,
    /// Set when the evaluator moves the property to vacant-equivalent
    /// enforcement. Cleared when the owner turns Shield Mode off.
    pub utility_lock_engaged_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Shield Mode display status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShieldMode {
    PassiveGuard,
    ActiveEnforcement,
    Inactive,
}

impl ShieldMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PassiveGuard => "PASSIVE_GUARD",
            Self::ActiveEnforcement => "ACTIVE_ENFORCEMENT",
            Self::Inactive => "INACTIVE",
        }
    }
}

impl std::fmt::Display for ShieldMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-time Shield Mode projection for one property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShieldStatus {
    pub property_id: PropertyId,
    pub enabled: bool,
    pub mode: ShieldMode,
    pub occupied: bool,
    pub utility_lock_engaged_at: Option<Timestamp>,
}

impl ShieldStatus {
    /// Derive the status from the property row and its stays.
    pub fn derive(property: &Property, stays: &[Stay], today: NaiveDate) -> Self {
        let occupied = property.is_occupied(stays, today);
        let mode = if occupied && property.utility_lock_engaged_at.is_none() {
            ShieldMode::PassiveGuard
        } else if property.shield_mode_enabled {
            ShieldMode::ActiveEnforcement
        } else {
            ShieldMode::Inactive
        };
        Self {
            property_id: property.id,
            enabled: property.shield_mode_enabled,
            mode,
            occupied,
            utility_lock_engaged_at: property.utility_lock_engaged_at,
        }
    }
}

/// Record of an owner-initiated Shield Mode change.
#[derive(Debug, Clone, Serialize)]
pub struct ShieldTransition {
    pub property_id: PropertyId,
    pub enabled: bool,
    pub utility_lock_released: bool,
    pub at: Timestamp,
    pub actor: Actor,
}

impl Property {
    pub fn create(draft: NewProperty, now: Timestamp) -> Result<Self, LifecycleError> {
        if draft.name.trim().is_empty() {
            return Err(LifecycleError::precondition("property name must not be blank"));
        }
        Ok(Self {
            id: PropertyId::new(),
            owner_id: draft.owner_id,
            owner_email: draft.owner_email,
            name: draft.name,
            region_code: draft.region_code,
            owner_occupied: draft.owner_occupied,
            shield_mode_enabled: false,
            utility_lock_engaged_at: None,
            created_at: now,
        })
    }

    /// Whether any of `stays` (all belonging to this property) occupies it on `today`.
    pub fn is_occupied(&self, stays: &[Stay], today: NaiveDate) -> bool {
        stays
            .iter()
            .any(|s| s.property_id == self.id && s.occupies(today))
    }

    /// Owner request to change Shield Mode.
    ///
    /// Turning it off succeeds only while it is on. Turning it on is always
    /// refused: Shield Mode is enabled by enforcement, never by the owner.
    pub fn request_shield_mode(
        &mut self,
        enabled: bool,
        actor: &Actor,
        now: Timestamp,
    ) -> Result<ShieldTransition, LifecycleError> {
        if enabled {
            return Err(self.invalid("ON", "Shield Mode can only be turned on automatically"));
        }
        if !self.shield_mode_enabled {
            return Err(self.invalid("OFF", "Shield Mode is already off"));
        }
        self.shield_mode_enabled = false;
        let utility_lock_released = self.utility_lock_engaged_at.take().is_some();
        Ok(ShieldTransition {
            property_id: self.id,
            enabled: false,
            utility_lock_released,
            at: now,
            actor: actor.clone(),
        })
    }

    /// Enforcement turns Shield Mode on. Returns whether anything changed.
    pub fn auto_enable_shield(&mut self) -> bool {
        let changed = !self.shield_mode_enabled;
        self.shield_mode_enabled = true;
        changed
    }

    /// Enforcement moves the property to vacant-equivalent enforcement:
    /// Shield Mode on and the utility lock flagged. Returns whether anything
    /// changed.
    pub fn engage_utility_lock(&mut self, now: Timestamp) -> bool {
        let shield_changed = self.auto_enable_shield();
        if self.utility_lock_engaged_at.is_some() {
            return shield_changed;
        }
        self.utility_lock_engaged_at = Some(now);
        true
    }

    fn invalid(&self, to: &str, reason: &str) -> LifecycleError {
        LifecycleError::InvalidTransition {
            entity: ENTITY,
            from: if self.shield_mode_enabled { "ON" } else { "OFF" }.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        }
    }
}
