//! # Enforce & Verify-Ledger Subcommands
//!
//! Operate on the Postgres store named by `DATABASE_URL`, using the same
//! configuration layer as the API server.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use stayguard_agentic::AuditLedger;
use stayguard_api::config::AppConfig;
use stayguard_api::store::{postgres, LifecycleStore, PgStore};
use stayguard_api::LifecycleService;
use stayguard_core::{JurisdictionRuleTable, Timestamp};

use crate::print_json;

/// Arguments for `stayguard enforce`.
#[derive(Args, Debug)]
pub struct EnforceArgs {
    /// Evaluate as of this instant (RFC 3339). Defaults to now.
    #[arg(long)]
    pub as_of: Option<DateTime<Utc>>,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

async fn open_store() -> Result<PgStore> {
    let config = AppConfig::from_env()?;
    let Some(url) = config.database_url else {
        bail!("DATABASE_URL must be set");
    };
    let pool = postgres::connect(&url).await.context("failed to connect to DATABASE_URL")?;
    Ok(PgStore::new(pool))
}

/// Exit code 1 when any stay could not be evaluated.
pub fn run_enforce(args: &EnforceArgs) -> Result<u8> {
    runtime()?.block_on(async {
        let store = open_store().await?;
        let rules = JurisdictionRuleTable::seeded();
        store.upsert_rules(&rules).await?;
        let service = LifecycleService::new(Arc::new(store), Arc::new(rules));
        let as_of = args.as_of.map(Timestamp::from_utc).unwrap_or_else(|| service.now());

        let report = service.run_enforcement(as_of).await?;
        print_json(&report)?;
        Ok(if report.errors == 0 { 0 } else { 1 })
    })
}

/// Exit code 2 when the chain is broken.
pub fn run_verify_ledger() -> Result<u8> {
    runtime()?.block_on(async {
        let store = open_store().await?;
        let verification = store.verify_chain().await?;
        print_json(&verification)?;
        if !verification.chain_valid {
            tracing::error!(
                broken_links = verification.broken_links,
                first_broken_sequence = ?verification.first_broken_sequence,
                "audit hash chain is broken"
            );
            return Ok(2);
        }
        Ok(0)
    })
}
