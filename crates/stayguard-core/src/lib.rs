#![deny(missing_docs)]

//! # stayguard-core: Foundational Types for StayGuard
//!
//! This crate defines the types every other crate in the workspace depends
//! on. It has no internal crate dependencies.
//!
//! ## Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** You cannot pass a [`StayId`]
//!    where a [`PropertyId`] is expected, and an [`InvitationCode`] is
//!    validated once at construction.
//!
//! 2. **Time is injected.** Every time-dependent decision takes either a
//!    [`Timestamp`] or a [`Clock`]. Nothing below the binaries calls
//!    `Utc::now()` directly, so enforcement rules can be replayed against a
//!    fixed instant.
//!
//! 3. **One error taxonomy.** [`LifecycleError`] is the single vocabulary
//!    for rejected transitions across invitations, stays and Shield Mode.
//!
//! 4. **Jurisdiction rules are seed data.** [`JurisdictionRuleTable::seeded`]
//!    is the only constructor used at runtime; rules are never edited.

pub mod actor;
pub mod error;
pub mod identity;
pub mod jurisdiction;
pub mod temporal;

pub use actor::{Actor, ActorRole};
pub use error::{ErrorKind, LifecycleError, ValidationError};
pub use identity::{
    AuditEntryId, InvitationCode, InvitationId, PropertyId, RegionCode, StayId, UserId,
};
pub use jurisdiction::{JurisdictionRule, JurisdictionRuleTable, LODGER_MAX_STAY_DAYS, LODGER_STATUTE};
pub use temporal::{days_between, Clock, FixedClock, SystemClock, Timestamp};
