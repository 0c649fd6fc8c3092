//! # stayguard-cli: Operator CLI
//!
//! Provides the `stayguard` command-line interface.
//!
//! ## Subcommands
//!
//! - `stayguard rules`: Print the seeded jurisdiction rule table.
//! - `stayguard classify`: Classify a proposed stay offline.
//! - `stayguard enforce`: One Dead Man's Switch pass against `DATABASE_URL`.
//! - `stayguard verify-ledger`: Re-check the audit hash chain.
//!
//! ```bash
//! stayguard classify --region NYC --start 2026-06-01 --end 2026-07-01 --payment
//! DATABASE_URL=postgres://... stayguard enforce --as-of 2026-07-01T00:00:00Z
//! ```
//!
//! Output is JSON on stdout; logs go to stderr.

pub mod ledger;
pub mod rules;

use anyhow::Result;
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
