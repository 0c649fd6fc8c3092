//! # Rules & Classify Subcommands
//!
//! Offline access to the seeded jurisdiction table and the risk classifier.
//! Neither touches a store.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Args;

use stayguard_compliance::{classify_in_region, Classification, StayAttributes};
use stayguard_core::{JurisdictionRuleTable, RegionCode};

use crate::print_json;

/// Arguments for `stayguard classify`.
#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Region code, e.g. NYC or CA.
    #[arg(long)]
    pub region: String,
    /// First night of the stay (YYYY-MM-DD).
    #[arg(long)]
    pub start: NaiveDate,
    /// Checkout date (YYYY-MM-DD).
    #[arg(long)]
    pub end: NaiveDate,
    /// The guest pays rent or an equivalent.
    #[arg(long)]
    pub payment: bool,
    /// The guest has exclusive possession of the unit.
    #[arg(long)]
    pub exclusive_possession: bool,
    /// The guest has no permanent address elsewhere.
    #[arg(long)]
    pub no_permanent_address: bool,
    /// The owner lives at the property.
    #[arg(long)]
    pub owner_occupied: bool,
}

pub fn run_rules() -> Result<u8> {
    let table = JurisdictionRuleTable::seeded();
    let rules: Vec<_> = table.iter().collect();
    print_json(&rules)?;
    Ok(0)
}

pub fn classify_args(args: &ClassifyArgs) -> Result<Classification> {
    let region = RegionCode::new(&args.region).context("invalid --region")?;
    let attrs = StayAttributes {
        stay_start_date: args.start,
        stay_end_date: args.end,
        payment_involved: args.payment,
        exclusive_possession: args.exclusive_possession,
        guest_has_permanent_address: !args.no_permanent_address,
        owner_occupied: args.owner_occupied,
    };
    let classification = classify_in_region(&JurisdictionRuleTable::seeded(), &region, &attrs)
        .with_context(|| format!("cannot classify stay in {region}"))?;
    Ok(classification)
}

/// Exit code 2 when the stay should not proceed.
pub fn run_classify(args: &ClassifyArgs) -> Result<u8> {
    let classification = classify_args(args)?;
    print_json(&classification)?;
    Ok(if classification.can_proceed { 0 } else { 2 })
}
