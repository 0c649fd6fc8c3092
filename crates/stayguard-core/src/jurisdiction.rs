//! # Jurisdiction Rules
//!
//! Static per-region occupancy policy. Each rule caps how many consecutive
//! days a guest may stay before local law starts treating the occupant as a
//! tenant, and how many days before that cap the classifier starts warning.
//!
//! A region may extend the cap for owner-occupied homes, where the guest is
//! a single lodger rather than a would-be tenant. California does.
//!
//! Rules are seed data. [`JurisdictionRuleTable::seeded`] builds the same
//! table on every startup and nothing in the workspace mutates it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identity::RegionCode;

/// Days before the cap at which a stay is flagged as approaching the limit.
pub const DEFAULT_WARNING_DAYS: u32 = 5;

/// Cap for a single lodger in an owner-occupied home, where allowed.
pub const LODGER_MAX_STAY_DAYS: u32 = 90;

/// Statute cited when the lodger cap applies.
pub const LODGER_STATUTE: &str = "CA Civil Code § 1946.5 (Single Lodger)";

/// Occupancy policy for one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionRule {
    /// Region this rule governs.
    pub region_code: RegionCode,
    /// Longest stay, in days, that remains a guest arrangement.
    pub max_safe_stay_days: u32,
    /// Consecutive days at which tenancy rights attach.
    pub tenancy_threshold_days: u32,
    /// Width of the warning window below `max_safe_stay_days`.
    pub warning_days: u32,
    /// Statute the limit is derived from.
    pub statute_reference: String,
    /// One-line explanation shown to owners.
    pub plain_english_explanation: String,
    /// Whether any payment from the guest is treated as rent.
    pub payment_creates_tenancy: bool,
    /// Whether an owner-occupied home gets the lodger cap.
    #[serde(default)]
    pub allow_extended_if_owner_occupied: bool,
}

impl JurisdictionRule {
    fn seed(
        code: &str,
        max_safe_stay_days: u32,
        statute: &str,
        explanation: &str,
        payment_creates_tenancy: bool,
        allow_extended_if_owner_occupied: bool,
    ) -> Option<Self> {
        Some(Self {
            region_code: RegionCode::new(code).ok()?,
            max_safe_stay_days,
            tenancy_threshold_days: max_safe_stay_days + 1,
            warning_days: DEFAULT_WARNING_DAYS,
            statute_reference: statute.to_string(),
            plain_english_explanation: explanation.to_string(),
            payment_creates_tenancy,
            allow_extended_if_owner_occupied,
        })
    }

    /// Whether a stay in a home the owner lives in is a lodger arrangement.
    pub fn lodger_applies(&self, owner_occupied: bool) -> bool {
        self.allow_extended_if_owner_occupied && owner_occupied
    }

    /// The cap that applies to a stay, given whether the owner lives in.
    pub fn max_stay_days(&self, owner_occupied: bool) -> u32 {
        if self.lodger_applies(owner_occupied) {
            LODGER_MAX_STAY_DAYS
        } else {
            self.max_safe_stay_days
        }
    }
}

/// The immutable set of jurisdiction rules, keyed by region.
#[derive(Debug, Clone, Default)]
pub struct JurisdictionRuleTable {
    rules: BTreeMap<RegionCode, JurisdictionRule>,
}

impl JurisdictionRuleTable {
    /// The built-in rule set (NYC, FL, CA, TX, WA).
    pub fn seeded() -> Self {
        Self::from_rules(
            [
                JurisdictionRule::seed(
                    "NYC",
                    29,
                    "NYC Admin Code § 26-521",
                    "Occupying a dwelling for 30 consecutive days creates tenancy rights. Max 29 days.",
                    true,
                    false,
                ),
                JurisdictionRule::seed(
                    "FL",
                    30,
                    "FL Statute § 82.036 (HB 621)",
                    "Sheriff may remove unauthorized person with signed affidavit; no lease.",
                    false,
                    false,
                ),
                JurisdictionRule::seed(
                    "CA",
                    29,
                    "CA Civil Code § 1940.1, AB 1482",
                    "Transient occupancy; 30+ days creates tenancy. Lodger if owner lives in.",
                    true,
                    true,
                ),
                JurisdictionRule::seed(
                    "TX",
                    29,
                    "Texas Property Code § 92.001, Penal Code § 30.05",
                    "Transient housing exempt from landlord-tenant; criminal trespass after notice.",
                    false,
                    false,
                ),
                JurisdictionRule::seed(
                    "WA",
                    29,
                    "RCW 9A.52.105",
                    "Tenancy is fact-specific; owner declaration can assist police removal in defined cases.",
                    false,
                    false,
                ),
            ]
            .into_iter()
            .flatten(),
        )
    }

    /// Build a table from arbitrary rules. Later duplicates replace earlier ones.
    pub fn from_rules(rules: impl IntoIterator<Item = JurisdictionRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| (r.region_code.clone(), r))
                .collect(),
        }
    }

    /// Look up the rule for a region.
    pub fn get(&self, region: &RegionCode) -> Option<&JurisdictionRule> {
        self.rules.get(region)
    }

    /// All rules ordered by region code.
    pub fn iter(&self) -> impl Iterator<Item = &JurisdictionRule> {
        self.rules.values()
    }

    /// Number of regions covered.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(s: &str) -> RegionCode {
        RegionCode::new(s).unwrap()
    }

    #[test]
    fn seeded_table_covers_five_regions() {
        let table = JurisdictionRuleTable::seeded();
        assert_eq!(table.len(), 5);
        let codes: Vec<_> = table.iter().map(|r| r.region_code.as_str()).collect();
        assert_eq!(codes, vec!["CA", "FL", "NYC", "TX", "WA"]);
    }

    #[test]
    fn florida_allows_thirty_days() {
        let table = JurisdictionRuleTable::seeded();
        let fl = table.get(&region("FL")).unwrap();
        assert_eq!(fl.max_safe_stay_days, 30);
        assert_eq!(fl.tenancy_threshold_days, 31);
    }

    #[test]
    fn threshold_is_one_past_the_cap() {
        for rule in JurisdictionRuleTable::seeded().iter() {
            assert_eq!(rule.tenancy_threshold_days, rule.max_safe_stay_days + 1);
            assert_eq!(rule.warning_days, DEFAULT_WARNING_DAYS);
            assert!(!rule.statute_reference.is_empty());
        }
    }

    #[test]
    fn only_california_extends_for_owner_occupied_homes() {
        let table = JurisdictionRuleTable::seeded();
        let ca = table.get(&region("CA")).unwrap();
        assert!(ca.lodger_applies(true));
        assert!(!ca.lodger_applies(false));
        assert_eq!(ca.max_stay_days(true), LODGER_MAX_STAY_DAYS);
        assert_eq!(ca.max_stay_days(false), 29);
        for code in ["NYC", "FL", "TX", "WA"] {
            let rule = table.get(&region(code)).unwrap();
            assert!(!rule.lodger_applies(true), "{code}");
            assert_eq!(rule.max_stay_days(true), rule.max_safe_stay_days);
        }
    }

    #[test]
    fn unknown_region_is_absent() {
        assert!(JurisdictionRuleTable::seeded().get(&region("ZZ")).is_none());
    }
}
