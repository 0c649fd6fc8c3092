//! # stayguard-state: Lifecycle State Machines
//!
//! Encodes the stay and invitation lifecycles as explicit enums whose
//! variants carry the timestamps of the transition that produced them.
//! A stay cannot hold two terminal markers at once because there is no
//! value of [`StayStatus`] that represents that.
//!
//! ## State Machines
//!
//! - **Stay** ([`stay`]): `Open → Completed | Cancelled | Revoked`. A revoked
//!   stay carries its vacate deadline (`revoked_at + 12h`) by construction.
//!
//! - **Invitation** ([`invitation`]): `Pending → Accepted | Cancelled`, with
//!   `Expired` computed at read time once the 12-hour acceptance window has
//!   passed.
//!
//! - **Property / Shield Mode** ([`property`]): occupancy and the Shield Mode
//!   display status are projections over the property's stays. The owner can
//!   turn Shield Mode off but never on.
//!
//! Every transition method is pure: it takes the current instant as an
//! argument and returns a transition record describing what changed. The
//! caller persists the new state and the ledger entry together.

pub mod invitation;
pub mod property;
pub mod stay;

pub use invitation::{
    Acceptance, Invitation, InvitationStatus, InvitationTransition, InvitationView, NewInvitation,
    ACCEPTANCE_WINDOW_HOURS,
};
pub use property::{NewProperty, Property, ShieldMode, ShieldStatus, ShieldTransition};
pub use stay::{NewStay, Stay, StayEvent, StayPhase, StayStatus, StayTransition, VACATE_GRACE_HOURS};
