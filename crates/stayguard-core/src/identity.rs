//! # Identity Newtypes
//!
//! Domain-primitive newtypes for identifiers. UUID-based identifiers are
//! always valid by construction; string-based ones ([`InvitationCode`],
//! [`RegionCode`]) validate format when built.

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

// ---------------------------------------------------------------------------
// UUID-based identifiers (always valid by construction)
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id! {
    /// A property registered by an owner.
    PropertyId
}

uuid_id! {
    /// A stay (an accepted occupancy license).
    StayId
}

uuid_id! {
    /// An invitation row. Guests address invitations by [`InvitationCode`].
    InvitationId
}

uuid_id! {
    /// An owner or guest account.
    UserId
}

uuid_id! {
    /// An audit ledger entry.
    AuditEntryId
}

// ---------------------------------------------------------------------------
// String-based identifiers (validated at construction)
// ---------------------------------------------------------------------------

/// The code a guest uses to accept an invitation: `INV-` plus eight
/// uppercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InvitationCode(String);

impl InvitationCode {
    const PREFIX: &'static str = "INV-";

    /// Generate a fresh random code from the OS entropy source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 4];
        OsRng.fill_bytes(&mut bytes);
        let hex: String = bytes.iter().map(|b| format!("{b:02X}")).collect();
        Self(format!("{}{hex}", Self::PREFIX))
    }

    /// Parse a code, normalising surrounding whitespace and case.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidInvitationCode`] unless the input is
    /// `INV-` followed by exactly eight hex digits.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = value.as_ref();
        let normalised = raw.trim().to_ascii_uppercase();
        let valid = normalised
            .strip_prefix(Self::PREFIX)
            .map(|hex| hex.len() == 8 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .unwrap_or(false);
        if !valid {
            return Err(ValidationError::InvalidInvitationCode(raw.to_string()));
        }
        Ok(Self(normalised))
    }

    /// Access the code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InvitationCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<InvitationCode> for String {
    fn from(code: InvitationCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for InvitationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A jurisdiction region code such as `NYC` or `CA`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    /// Parse a region code, upper-casing the input.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidRegionCode`] unless the trimmed
    /// input is 2-8 ASCII letters or digits.
    pub fn new(value: impl AsRef<str>) -> Result<Self, ValidationError> {
        let raw = value.as_ref();
        let normalised = raw.trim().to_ascii_uppercase();
        if !(2..=8).contains(&normalised.len())
            || !normalised.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ValidationError::InvalidRegionCode(raw.to_string()));
        }
        Ok(Self(normalised))
    }

    /// Access the region code string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RegionCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RegionCode> for String {
    fn from(code: RegionCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for RegionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
