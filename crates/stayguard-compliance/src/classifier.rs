//! # Risk Classifier
//!
//! Duration drives the base classification:
//!
//! | duration                              | stay type            | level    |
//! |---------------------------------------|----------------------|----------|
//! | `> max_safe_stay_days`                | `TENANT_RISK`        | CRITICAL |
//! | `> max_safe_stay_days - warning_days` | `TEMPORARY_OCCUPANT` | MEDIUM   |
//! | otherwise                             | `GUEST`              | LOW      |
//!
//! Where the region extends the cap for owner-occupied homes and the owner
//! lives in, the cap becomes the lodger cap and a stay within it is a
//! `LODGER` (still MEDIUM inside the warning window). The lodger statute is
//! cited alongside the region's own.
//!
//! Payment raises the level to HIGH (tenancy-creating jurisdictions) or
//! MEDIUM, never lowering a CRITICAL result. Each factor present adds a
//! fixed weight to the score, which is capped at 100.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stayguard_core::{days_between, JurisdictionRule, JurisdictionRuleTable, RegionCode, LODGER_STATUTE};
use stayguard_state::{Invitation, Stay};

const MAX_SCORE: u32 = 100;

/// Classification errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// No rule is seeded for the region.
    #[error("no jurisdiction rule for region {0}")]
    UnknownRegion(String),

    /// The end date is not after the start date.
    #[error("stay end date {end} must be after start date {start}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StayType {
    Guest,
    Lodger,
    TemporaryOccupant,
    TenantRisk,
}

/// Ordered so that `max` picks the more severe level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFactorCode {
    DurationExceedsLimit,
    ApproachingLimit,
    PaymentInvolved,
    ExclusivePossession,
    NoPermanentAddress,
}

impl RiskFactorCode {
    /// Score contribution of this factor.
    pub fn weight(&self) -> u32 {
        match self {
            Self::DurationExceedsLimit => 50,
            Self::ApproachingLimit => 20,
            Self::PaymentInvolved => 25,
            Self::ExclusivePossession => 20,
            Self::NoPermanentAddress => 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub code: RiskFactorCode,
    pub severity: RiskLevel,
    pub description: String,
}

/// Inputs to the classifier beyond the region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayAttributes {
    pub stay_start_date: NaiveDate,
    pub stay_end_date: NaiveDate,
    #[serde(default)]
    pub payment_involved: bool,
    #[serde(default)]
    pub exclusive_possession: bool,
    #[serde(default = "default_true")]
    pub guest_has_permanent_address: bool,
    /// The owner lives at the property.
    #[serde(default)]
    pub owner_occupied: bool,
}

fn default_true() -> bool {
    true
}

impl StayAttributes {
    /// Attributes for a date range with no aggravating factors.
    pub fn for_dates(stay_start_date: NaiveDate, stay_end_date: NaiveDate) -> Self {
        Self {
            stay_start_date,
            stay_end_date,
            payment_involved: false,
            exclusive_possession: false,
            guest_has_permanent_address: true,
            owner_occupied: false,
        }
    }

    pub fn with_owner_occupied(mut self, owner_occupied: bool) -> Self {
        self.owner_occupied = owner_occupied;
        self
    }

    /// Number of days covered by the range.
    pub fn duration_days(&self) -> i64 {
        days_between(self.stay_start_date, self.stay_end_date)
    }
}

impl From<&Stay> for StayAttributes {
    fn from(stay: &Stay) -> Self {
        Self::for_dates(stay.stay_start_date, stay.stay_end_date)
    }
}

impl From<&Invitation> for StayAttributes {
    fn from(inv: &Invitation) -> Self {
        Self::for_dates(inv.stay_start_date, inv.stay_end_date)
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub region_code: RegionCode,
    pub stay_type: StayType,
    pub risk_level: RiskLevel,
    pub risk_score: u32,
    pub risk_factors: Vec<RiskFactor>,
    pub can_proceed: bool,
    pub duration_days: i64,
    pub max_safe_stay_days: u32,
    pub applicable_statutes: Vec<String>,
    pub message: Option<String>,
}

/// Classify a stay against one rule.
pub fn classify(rule: &JurisdictionRule, attrs: &StayAttributes) -> Classification {
    let duration_days = attrs.duration_days();
    let lodger = rule.lodger_applies(attrs.owner_occupied);
    let max_days = rule.max_stay_days(attrs.owner_occupied);
    let tenancy_at = if lodger {
        max_days + 1
    } else {
        rule.tenancy_threshold_days
    };
    let max = i64::from(max_days);
    let warn_from = max - i64::from(rule.warning_days);
    let within_type = if lodger {
        StayType::Lodger
    } else {
        StayType::TemporaryOccupant
    };
    let mut factors = Vec::new();
    let mut message = None;

    let (stay_type, mut risk_level) = if duration_days > max {
        factors.push(RiskFactor {
            code: RiskFactorCode::DurationExceedsLimit,
            severity: RiskLevel::Critical,
            description: format!(
                "Stay of {duration_days} days exceeds the {max}-day limit; tenancy rights attach at {tenancy_at} days"
            ),
        });
        message = Some(format!(
            "Stay of {duration_days} days exceeds maximum allowed {max} days for this region."
        ));
        (StayType::TenantRisk, RiskLevel::Critical)
    } else if duration_days > warn_from {
        factors.push(RiskFactor {
            code: RiskFactorCode::ApproachingLimit,
            severity: RiskLevel::Medium,
            description: format!(
                "Stay of {duration_days} days is within {} days of the {max}-day limit",
                rule.warning_days
            ),
        });
        (within_type, RiskLevel::Medium)
    } else if lodger {
        (StayType::Lodger, RiskLevel::Low)
    } else {
        (StayType::Guest, RiskLevel::Low)
    };

    if attrs.payment_involved {
        let severity = if rule.payment_creates_tenancy {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
        factors.push(RiskFactor {
            code: RiskFactorCode::PaymentInvolved,
            severity,
            description: if rule.payment_creates_tenancy {
                "Payment may be treated as rent in this jurisdiction".to_string()
            } else {
                "Payment involved; keep it clearly separate from rent".to_string()
            },
        });
        if risk_level != RiskLevel::Critical {
            risk_level = risk_level.max(severity);
        }
    }

    if attrs.exclusive_possession {
        factors.push(RiskFactor {
            code: RiskFactorCode::ExclusivePossession,
            severity: RiskLevel::Medium,
            description: "Guest has exclusive possession of the dwelling".to_string(),
        });
    }

    if !attrs.guest_has_permanent_address {
        factors.push(RiskFactor {
            code: RiskFactorCode::NoPermanentAddress,
            severity: RiskLevel::Low,
            description: "Guest has no permanent address elsewhere".to_string(),
        });
    }

    let mut statutes = vec![rule.statute_reference.clone()];
    if lodger {
        statutes.push(LODGER_STATUTE.to_string());
    }

    let risk_score = factors
        .iter()
        .map(|f| f.code.weight())
        .sum::<u32>()
        .min(MAX_SCORE);

    Classification {
        region_code: rule.region_code.clone(),
        stay_type,
        risk_level,
        risk_score,
        risk_factors: factors,
        can_proceed: risk_level != RiskLevel::Critical,
        duration_days,
        max_safe_stay_days: max_days,
        applicable_statutes: statutes,
        message,
    }
}

/// Look up the region's rule and classify.
///
/// # Errors
///
/// [`ClassifyError::UnknownRegion`] if the region has no rule, and
/// [`ClassifyError::InvalidDateRange`] unless end is after start.
pub fn classify_in_region(
    table: &JurisdictionRuleTable,
    region: &RegionCode,
    attrs: &StayAttributes,
) -> Result<Classification, ClassifyError> {
    let rule = table
        .get(region)
        .ok_or_else(|| ClassifyError::UnknownRegion(region.to_string()))?;
    if attrs.stay_end_date <= attrs.stay_start_date {
        return Err(ClassifyError::InvalidDateRange {
            start: attrs.stay_start_date,
            end: attrs.stay_end_date,
        });
    }
    let classification = classify(rule, attrs);
    tracing::debug!(
        region = %region,
        duration_days = classification.duration_days,
        risk_level = %classification.risk_level,
        risk_score = classification.risk_score,
        "classified stay"
    );
    Ok(classification)
}
