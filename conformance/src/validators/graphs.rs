//! Graph document validator.
//!
//! Every `.ttl`, `.jsonld` and `.nt` file under `nidm/sub-*`:
//! - parses in the format its extension names
//! - survives a serialize/parse round trip with the same statement set
//! - carries the same statements as its sibling documents in other formats
//! - describes at least one QC activity with its subject, agent and start time

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mriqc_nidm::model::iris;
use mriqc_nidm::parser::parse_file;
use mriqc_nidm::serializer::{serialize, GraphFormat};
use mriqc_nidm::{parser, Graph, Namespaces, Term};
use walkdir::WalkDir;

use crate::report::{ConformanceReport, TestResult};

/// Graph documents below `nidm`, grouped by path without extension.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked.
pub fn graph_documents(nidm: &Path) -> Result<BTreeMap<PathBuf, Vec<PathBuf>>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for entry in WalkDir::new(nidm).min_depth(2).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", nidm.display()))?;
        let path = entry.path();
        // Plain `.json` files are summaries, not graphs.
        let is_summary = path.extension().is_some_and(|ext| ext == "json");
        if entry.file_type().is_file() && !is_summary && GraphFormat::from_path(path).is_some() {
            groups
                .entry(path.with_extension(""))
                .or_default()
                .push(path.to_path_buf());
        }
    }
    Ok(groups)
}

/// Validates every graph document of a NIDM output directory.
///
/// # Errors
///
/// Returns an error if the directory cannot be walked.
pub fn validate(nidm: &Path) -> Result<ConformanceReport> {
    let mut report = ConformanceReport::new();
    let groups = graph_documents(nidm)?;
    let documents: usize = groups.values().map(Vec::len).sum();
    if documents == 0 {
        report.push(TestResult::fail("graphs/parse", "no graph documents found"));
        return Ok(report);
    }

    let ns = Namespaces::standard();
    let mut parse_failures = Vec::new();
    let mut round_trip_failures = Vec::new();
    let mut disagreements = Vec::new();
    let mut structure_issues = Vec::new();

    for (stem, paths) in &groups {
        let mut parsed: Vec<(&PathBuf, Graph)> = Vec::with_capacity(paths.len());
        for path in paths {
            match parse_file(path) {
                Ok((graph, format)) => {
                    if let Err(detail) = round_trip(&graph, format, &ns) {
                        round_trip_failures.push(format!("{}: {detail}", path.display()));
                    }
                    structure_issues.extend(
                        activity_issues(&graph)
                            .into_iter()
                            .map(|issue| format!("{}: {issue}", path.display())),
                    );
                    parsed.push((path, graph));
                }
                Err(e) => parse_failures.push(format!("{}: {e}", path.display())),
            }
        }
        if let Some(((first_path, first), rest)) = parsed.split_first() {
            for (path, graph) in rest {
                if !same_statements(graph, first) {
                    disagreements.push(format!(
                        "{}: {} has {} statements, {} has {}",
                        stem.display(),
                        first_path.display(),
                        first.len(),
                        path.display(),
                        graph.len()
                    ));
                }
            }
        }
    }

    push(
        &mut report,
        "graphs/parse",
        format!("{documents} graph documents parse"),
        "graph documents do not parse",
        parse_failures,
        false,
    );
    push(
        &mut report,
        "graphs/round-trip",
        "serialize/parse round trips preserve every statement",
        "round trips change the statement set",
        round_trip_failures,
        false,
    );
    push(
        &mut report,
        "graphs/formats",
        format!("{} documents agree across formats", groups.len()),
        "documents of one subject disagree across formats",
        disagreements,
        false,
    );
    push(
        &mut report,
        "graphs/activities",
        "every graph describes complete QC activities",
        "QC activities are incomplete",
        structure_issues,
        true,
    );
    Ok(report)
}

fn push(
    report: &mut ConformanceReport,
    validator: &str,
    ok: impl Into<String>,
    problem: &str,
    issues: Vec<String>,
    warn_only: bool,
) {
    let result = match (issues.is_empty(), warn_only) {
        (true, _) => TestResult::pass(validator, ok),
        (false, true) => TestResult::warn(validator, problem).with_details(issues),
        (false, false) => TestResult::fail(validator, problem).with_details(issues),
    };
    report.push(result);
}

fn round_trip(graph: &Graph, format: GraphFormat, ns: &Namespaces) -> Result<(), String> {
    let bytes = serialize(graph, format, ns).map_err(|e| e.to_string())?;
    let back = parser::parse(&bytes, format).map_err(|e| e.to_string())?;
    if same_statements(&back, graph) {
        Ok(())
    } else {
        Err(format!("{} statements became {}", graph.len(), back.len()))
    }
}

/// Parsers may relabel blank nodes, so graphs containing them are only
/// compared by size.
fn same_statements(a: &Graph, b: &Graph) -> bool {
    let blank = |g: &Graph| {
        g.iter()
            .any(|t| matches!(t.subject, Term::Blank(_)) || matches!(t.object, Term::Blank(_)))
    };
    if blank(a) || blank(b) {
        a.len() == b.len()
    } else {
        a == b
    }
}

fn activity_issues(graph: &Graph) -> Vec<String> {
    let activities: Vec<_> = graph.instances_of(iris::PROV_ACTIVITY).collect();
    if activities.is_empty() {
        return vec!["no prov:Activity".to_owned()];
    }
    let mut issues = Vec::new();
    for activity in activities {
        for (predicate, name) in [
            (iris::PROV_USED, "prov:used"),
            (iris::PROV_WAS_ASSOCIATED_WITH, "prov:wasAssociatedWith"),
            (iris::PROV_STARTED_AT_TIME, "prov:startedAtTime"),
        ] {
            if graph.objects(activity, predicate).next().is_none() {
                issues.push(format!("{activity} has no {name}"));
            }
        }
    }
    issues
}
