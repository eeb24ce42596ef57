//! `mriqc-nidm-conformance`: Validates a NIDM output tree.
//!
//! Runs the conformance suite across:
//! - Layout (BIDS derivative descriptor, file naming, conversion summaries)
//! - Graph documents (parsing, round trips, cross-format agreement, QC activities)
//!
//! **Usage:**
//! ```text
//! mriqc-nidm-conformance [--nidm <path>]
//! ```
//!
//! Exits non-zero if any conformance check fails.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::path::PathBuf;
use std::process;

use anyhow::Result;
use clap::Parser;
use mriqc_nidm_conformance::{run_all, Severity};

/// Run the NIDM output conformance suite.
#[derive(Parser)]
#[command(
    name = "mriqc-nidm-conformance",
    version,
    about = "Validate a NIDM output tree produced by mriqc-nidm"
)]
struct Args {
    /// The `nidm/` directory to check.
    #[arg(long, default_value = "nidm")]
    nidm: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let report = run_all(&args.nidm)?;

    println!("NIDM Output Conformance Report");
    println!("==============================");
    println!();

    for result in &report.results {
        println!("[{}] {}: {}", result.severity, result.validator, result.message);
        for detail in &result.details {
            println!("       {detail}");
        }
    }

    let failed = report.count(Severity::Failure);
    println!();
    println!(
        "Summary: {} passed, {} warnings, {} failed",
        report.count(Severity::Pass),
        report.count(Severity::Warning),
        failed
    );

    if failed > 0 {
        eprintln!("Conformance FAILED: {failed} check(s) did not pass.");
        process::exit(1);
    }

    println!("Conformance PASSED.");
    Ok(())
}
