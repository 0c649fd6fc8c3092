//! # stayguard CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use stayguard_cli::ledger::{run_enforce, run_verify_ledger, EnforceArgs};
use stayguard_cli::rules::{run_classify, run_rules, ClassifyArgs};

/// StayGuard operator CLI.
///
/// Inspects jurisdiction rules, classifies stays offline, runs enforcement
/// passes and verifies the audit ledger.
#[derive(Parser, Debug)]
#[command(name = "stayguard", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the seeded jurisdiction rule table.
    Rules,

    /// Classify a proposed stay against its region's rules.
    Classify(ClassifyArgs),

    /// Run one Dead Man's Switch pass against DATABASE_URL.
    Enforce(EnforceArgs),

    /// Verify the audit ledger hash chain in DATABASE_URL.
    VerifyLedger,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Rules => run_rules(),
        Commands::Classify(args) => run_classify(&args),
        Commands::Enforce(args) => run_enforce(&args),
        Commands::VerifyLedger => run_verify_ledger(),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}
