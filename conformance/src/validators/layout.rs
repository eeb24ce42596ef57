//! BIDS derivative layout validator.
//!
//! - `nidm/dataset_description.json` exists and names a derivative dataset
//! - every file under `nidm/sub-*` follows `sub-<id>[_ses-<label>]` naming and
//!   sits in the directory its entities name
//! - every conversion summary parses and lists outputs that exist

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use crate::report::{ConformanceReport, TestResult};

const REQUIRED_DESCRIPTION_FIELDS: &[&str] =
    &["Name", "BIDSVersion", "DatasetType", "GeneratedBy", "HowToAcknowledge"];

/// Validates the layout of a NIDM output directory.
///
/// # Errors
///
/// Returns an error if a file that exists cannot be read.
pub fn validate(nidm: &Path) -> Result<ConformanceReport> {
    let mut report = ConformanceReport::new();
    validate_description(nidm, &mut report)?;
    validate_naming(nidm, &mut report)?;
    validate_summaries(nidm, &mut report)?;
    Ok(report)
}

fn validate_description(nidm: &Path, report: &mut ConformanceReport) -> Result<()> {
    let path = nidm.join("dataset_description.json");
    if !path.is_file() {
        report.push(TestResult::fail(
            "layout/description",
            "dataset_description.json not found",
        ));
        return Ok(());
    }
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = match serde_json::from_str(&text) {
        Ok(value) => value,
        Err(e) => {
            report.push(TestResult::fail(
                "layout/description",
                format!("dataset_description.json is not valid JSON: {e}"),
            ));
            return Ok(());
        }
    };

    let mut issues: Vec<String> = REQUIRED_DESCRIPTION_FIELDS
        .iter()
        .filter(|field| value.get(**field).is_none())
        .map(|field| format!("missing field {field}"))
        .collect();
    if value.get("DatasetType").is_some_and(|t| t != "derivative") {
        issues.push("DatasetType is not \"derivative\"".to_owned());
    }
    if value
        .get("GeneratedBy")
        .and_then(Value::as_array)
        .is_some_and(|tools| tools.iter().any(|t| t.get("Name").is_none()))
    {
        issues.push("a GeneratedBy entry has no Name".to_owned());
    }

    if issues.is_empty() {
        report.push(TestResult::pass(
            "layout/description",
            "dataset_description.json describes a BIDS derivative",
        ));
    } else {
        report.push(
            TestResult::fail("layout/description", "dataset_description.json is incomplete")
                .with_details(issues),
        );
    }
    Ok(())
}

fn validate_naming(nidm: &Path, report: &mut ConformanceReport) -> Result<()> {
    let name_pattern = Regex::new(
        r"^sub-(?P<sub>[A-Za-z0-9]+)(?:_ses-(?P<ses>[A-Za-z0-9]+))?(?:\.(?:ttl|jsonld|nt)|_summary\.json)$",
    )?;

    let mut checked = 0usize;
    let mut issues = Vec::new();
    let mut stray = Vec::new();
    for entry in WalkDir::new(nidm).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", nidm.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(nidm).unwrap_or(entry.path());
        let parts: Vec<&str> = rel.iter().filter_map(|p| p.to_str()).collect();
        let name = entry.file_name().to_string_lossy();

        if parts.len() == 1 {
            if name != "dataset_description.json" {
                stray.push(rel.display().to_string());
            }
            continue;
        }
        checked += 1;
        let Some(caps) = name_pattern.captures(&name) else {
            issues.push(format!("{}: not a sub-<id>[_ses-<label>] output name", rel.display()));
            continue;
        };
        let mut expected = vec![format!("sub-{}", &caps["sub"])];
        if let Some(ses) = caps.name("ses") {
            expected.push(format!("ses-{}", ses.as_str()));
        }
        if parts[..parts.len() - 1] != expected[..] {
            issues.push(format!(
                "{}: expected under {}/",
                rel.display(),
                expected.join("/")
            ));
        }
    }

    if !stray.is_empty() {
        report.push(
            TestResult::warn("layout/naming", "unexpected files at the top of nidm/")
                .with_details(stray),
        );
    }
    if checked == 0 {
        report.push(TestResult::fail("layout/naming", "no subject outputs found"));
    } else if issues.is_empty() {
        report.push(TestResult::pass(
            "layout/naming",
            format!("{checked} subject files follow BIDS naming"),
        ));
    } else {
        report.push(
            TestResult::fail(
                "layout/naming",
                format!("{} of {checked} subject files are misnamed or misplaced", issues.len()),
            )
            .with_details(issues),
        );
    }
    Ok(())
}

fn validate_summaries(nidm: &Path, report: &mut ConformanceReport) -> Result<()> {
    let mut checked = 0usize;
    let mut issues = Vec::new();
    for entry in WalkDir::new(nidm).min_depth(2).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", nidm.display()))?;
        let path = entry.path();
        if !path.to_string_lossy().ends_with("_summary.json") {
            continue;
        }
        checked += 1;
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let summary: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                issues.push(format!("{}: {e}", path.display()));
                continue;
            }
        };
        let outputs = summary
            .get("outputs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if outputs.is_empty() {
            issues.push(format!("{}: lists no outputs", path.display()));
        }
        for output in outputs {
            match output.get("path").and_then(Value::as_str) {
                Some(p) if exists_near(path, Path::new(p)) => {}
                Some(p) => issues.push(format!("{}: output {p} does not exist", path.display())),
                None => issues.push(format!("{}: output without a path", path.display())),
            }
        }
    }

    if checked == 0 {
        report.push(TestResult::warn("layout/summaries", "no conversion summaries found"));
    } else if issues.is_empty() {
        report.push(TestResult::pass(
            "layout/summaries",
            format!("{checked} conversion summaries are consistent"),
        ));
    } else {
        report.push(
            TestResult::fail("layout/summaries", "conversion summaries are inconsistent")
                .with_details(issues),
        );
    }
    Ok(())
}

/// Recorded paths may be relative to the converter's working directory, so
/// the summary's own directory is tried too.
fn exists_near(summary: &Path, output: &Path) -> bool {
    output.is_file()
        || match (summary.parent(), output.file_name()) {
            (Some(dir), Some(name)) => dir.join(name).is_file(),
            _ => false,
        }
}
