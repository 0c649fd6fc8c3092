//! # API Route Modules
//!
//! - `properties`: property registration and Shield Mode.
//! - `invitations`: invitation lifecycle (create, sign, accept, cancel, list).
//! - `stays`: stay lifecycle (end, cancel, revoke, USAT release) and listings
//!   with derived phase and classification.
//! - `audit`: ledger queries and hash-chain verification.
//! - `enforcement`: on-demand Dead Man's Switch pass for system callers.
//! - `rules`: jurisdiction rule table and the standalone classifier.

pub mod audit;
pub mod enforcement;
pub mod invitations;
pub mod properties;
pub mod rules;
pub mod stays;

use serde::Serialize;

/// The serialized name of a unit enum variant, e.g. `TEMPORARY_OCCUPANT`.
pub(crate) fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stayguard_compliance::StayType;
    use stayguard_state::StayPhase;

    #[test]
    fn wire_name_uses_serde_renames() {
        assert_eq!(wire_name(&StayType::TemporaryOccupant), "TEMPORARY_OCCUPANT");
        assert_eq!(wire_name(&StayPhase::Overstayed), "OVERSTAYED");
    }
}
