//! # stayguard-compliance: Tenancy Risk Classification
//!
//! A pure classifier over the jurisdiction rule table. Given a region and
//! the attributes of a proposed or existing stay, it reports whether the
//! arrangement still reads as a guest stay, is approaching the local
//! tenancy threshold, or has crossed it.
//!
//! ```text
//! stayguard-core (data)        stayguard-compliance         callers
//!   JurisdictionRuleTable  -->   classify_in_region()  -->   invitation creation
//!   JurisdictionRule             classify()                  stay listings, CLI
//! ```
//!
//! The classification is advisory. `can_proceed` is false only for
//! `CRITICAL` results and callers decide whether to honour it.

pub mod classifier;

pub use classifier::{
    classify, classify_in_region, Classification, ClassifyError, RiskFactor, RiskFactorCode,
    RiskLevel, StayAttributes, StayType,
};
