//! Conformance suite for NIDM output trees produced by `mriqc-nidm`.
//!
//! # Conformance Scope
//!
//! | Area | Checks |
//! |------|--------|
//! | Layout | BIDS derivative descriptor, `sub-<id>[_ses-<label>]` naming, summaries |
//! | Graphs | Parsing, round trips, cross-format agreement, QC activity structure |
//!
//! # Entry Point
//!
//! ```no_run
//! use std::path::Path;
//!
//! let report = mriqc_nidm_conformance::run_all(Path::new("derivatives/nidm"))?;
//! assert!(report.all_passed());
//! # Ok::<(), anyhow::Error>(())
//! ```

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

pub mod report;
pub mod validators;

use std::path::Path;

pub use report::{ConformanceReport, Severity, TestResult};

/// Runs all validators against a `nidm/` directory.
///
/// Validators run in this order:
/// 1. Layout (descriptor, naming, summaries)
/// 2. Graph documents (parse, round trip, formats, activities)
///
/// # Errors
///
/// Returns an error if `nidm` is not a directory or a file system operation
/// fails.
pub fn run_all(nidm: &Path) -> anyhow::Result<ConformanceReport> {
    anyhow::ensure!(nidm.is_dir(), "{} is not a directory", nidm.display());

    let mut report = ConformanceReport::new();
    report.extend(validators::layout::validate(nidm)?);
    report.extend(validators::graphs::validate(nidm)?);
    Ok(report)
}
