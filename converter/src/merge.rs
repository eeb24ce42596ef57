//! Non-destructive augmentation of prior provenance graphs.
//!
//! A prior graph is never opened for writing. When one exists it is first
//! copied byte-for-byte to the output location of its own format (flushed,
//! synced and closed), and only that copy is parsed and later overwritten. If
//! the copy cannot be parsed it is left exactly as copied.
//!
//! The merger is a small state machine:
//!
//! ```text
//! NoExistingGraph ─────────────────────────────────────────► (fragment only)
//! ExistingGraphPresent ─ update / convert ─► Merged
//!                      ─ replace ──────────► Replaced
//!                      ─ parse failure ────► Failed
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::MergeError;
use crate::model::iris;
use crate::model::{Graph, Term};
use crate::parser;
use crate::serializer::GraphFormat;

/// How new metrics relate to a prior graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Write the new fragment only; any prior graph is ignored.
    Generate,
    /// Union the fragment into the prior graph.
    Update,
    /// Re-serialize the prior graph without adding metrics.
    Convert,
    /// Drop the prior QC activities the fragment supersedes, then add it.
    Replace,
}

impl Mode {
    /// Mode to use when the caller did not pick one: `update` when a prior
    /// graph exists, `generate` otherwise.
    #[must_use]
    pub fn infer(explicit: Option<Mode>, prior_exists: bool) -> Mode {
        match explicit {
            Some(mode) => mode,
            None if prior_exists => Mode::Update,
            None => Mode::Generate,
        }
    }

    /// Lower-case name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Mode::Generate => "generate",
            Mode::Update => "update",
            Mode::Convert => "convert",
            Mode::Replace => "replace",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "generate" => Ok(Mode::Generate),
            "update" => Ok(Mode::Update),
            "convert" => Ok(Mode::Convert),
            "replace" => Ok(Mode::Replace),
            other => Err(format!(
                "unknown mode `{other}` (expected generate, update, convert or replace)"
            )),
        }
    }
}

impl serde::Serialize for Mode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Merger states. Every transition is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergeState {
    /// No usable prior graph; the fragment is the whole output.
    NoExistingGraph,
    /// A prior graph exists and has been copied to the output location.
    ExistingGraphPresent,
    /// The copy was parsed and the fragment unioned into it.
    Merged,
    /// Superseded activities were removed from the copy before the union.
    Replaced,
    /// The copy could not be parsed and was left unmodified.
    Failed,
}

impl MergeState {
    /// Lower-case name used in logs and summaries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MergeState::NoExistingGraph => "no_existing_graph",
            MergeState::ExistingGraphPresent => "existing_graph_present",
            MergeState::Merged => "merged",
            MergeState::Replaced => "replaced",
            MergeState::Failed => "failed",
        }
    }

    fn advance(self, next: MergeState) -> MergeState {
        info!(from = self.as_str(), to = next.as_str(), "merge state transition");
        next
    }
}

impl fmt::Display for MergeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for MergeState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Where a prior graph came from and where its copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorCopy {
    /// The prior graph, never written to.
    pub source: PathBuf,
    /// The verbatim copy, later overwritten with the merged graph.
    pub copy: PathBuf,
    /// Format of both files.
    pub format: GraphFormat,
}

/// Result of a completed merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The graph to serialize.
    pub graph: Graph,
    /// Mode actually applied.
    pub mode: Mode,
    /// Terminal state.
    pub state: MergeState,
    /// Statements of the fragment that were not already present.
    pub added: usize,
    /// Statements removed in replace mode.
    pub removed: usize,
    /// The prior graph's copy, if one was made.
    pub prior: Option<PriorCopy>,
}

/// Merges `fragment` into the prior graph at `prior` (if any).
///
/// `destination` maps a format to the canonical output path for that format;
/// the prior graph is copied to `destination(format_of_prior)`.
///
/// # Errors
///
/// - [`MergeError::NothingToConvert`] for convert mode without a prior graph.
/// - [`MergeError::UnrecognizedFormat`] if the prior graph's extension is not
///   a supported format.
/// - [`MergeError::OutputAliasesInput`] if the copy destination is the prior
///   graph itself.
/// - [`MergeError::Copy`] if the copy fails.
/// - [`MergeError::ExistingGraphParse`] if the copy does not parse; the copy
///   is kept unmodified.
pub fn augment(
    fragment: &Graph,
    explicit_mode: Option<Mode>,
    prior: Option<&Path>,
    destination: impl Fn(GraphFormat) -> PathBuf,
) -> Result<MergeOutcome, MergeError> {
    let prior = prior.filter(|p| p.is_file());
    let mode = Mode::infer(explicit_mode, prior.is_some());

    let prior = match (prior, mode) {
        (None, Mode::Convert) => return Err(MergeError::NothingToConvert),
        (None, _) => None,
        (Some(path), Mode::Generate) => {
            warn!(prior = %path.display(), "generate mode ignores the prior graph");
            None
        }
        (Some(path), _) => Some(path),
    };

    let Some(source) = prior else {
        if matches!(mode, Mode::Update | Mode::Replace) {
            warn!(%mode, "no prior graph found; writing the new metrics only");
        }
        info!(state = MergeState::NoExistingGraph.as_str(), %mode, "no prior graph to merge");
        return Ok(MergeOutcome {
            graph: fragment.clone(),
            mode,
            state: MergeState::NoExistingGraph,
            added: fragment.len(),
            removed: 0,
            prior: None,
        });
    };

    let format =
        GraphFormat::from_path(source).ok_or_else(|| MergeError::UnrecognizedFormat(source.to_path_buf()))?;
    let copy = destination(format);
    copy_verbatim(source, &copy)?;
    let state = MergeState::ExistingGraphPresent;
    info!(prior = %source.display(), copy = %copy.display(), %mode, "copied prior graph");

    let bytes = std::fs::read(&copy).map_err(|e| MergeError::Copy {
        from: source.to_path_buf(),
        to: copy.clone(),
        source: e,
    })?;
    let mut graph = match parser::parse(&bytes, format) {
        Ok(graph) => graph,
        Err(source) => {
            let state = state.advance(MergeState::Failed);
            warn!(
                state = state.as_str(),
                copy = %copy.display(),
                error = %source,
                "prior graph does not parse; copy left unmodified"
            );
            return Err(MergeError::ExistingGraphParse { copy, source });
        }
    };
    let prior_len = graph.len();

    let (state, added, removed) = match mode {
        Mode::Convert => (state.advance(MergeState::Merged), 0, 0),
        Mode::Replace => {
            let superseded = superseded_activities(&graph, fragment);
            let removed = graph.remove_nodes(&superseded);
            let added = graph.union_with(fragment);
            (state.advance(MergeState::Replaced), added, removed)
        }
        // Generate never reaches here.
        Mode::Update | Mode::Generate => {
            let added = graph.union_with(fragment);
            (state.advance(MergeState::Merged), added, 0)
        }
    };
    info!(prior = prior_len, added, removed, total = graph.len(), "merged graph");

    Ok(MergeOutcome {
        graph,
        mode,
        state,
        added,
        removed,
        prior: Some(PriorCopy {
            source: source.to_path_buf(),
            copy,
            format,
        }),
    })
}

/// Copies `from` to `to` byte-for-byte and syncs the copy to disk before
/// returning. Refuses when `to` is `from`.
fn copy_verbatim(from: &Path, to: &Path) -> Result<(), MergeError> {
    let copy_err = |source| MergeError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    if same_file(from, to) {
        return Err(MergeError::OutputAliasesInput(to.to_path_buf()));
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).map_err(copy_err)?;
    }
    let mut reader = File::open(from).map_err(copy_err)?;
    let mut writer = File::create(to).map_err(copy_err)?;
    io::copy(&mut reader, &mut writer).map_err(copy_err)?;
    writer.sync_all().map_err(copy_err)?;
    Ok(())
}

/// True when both paths name the same file. `to` may not exist yet, so its
/// parent directory is resolved instead.
fn same_file(from: &Path, to: &Path) -> bool {
    let Ok(from) = from.canonicalize() else {
        return false;
    };
    if let Ok(to) = to.canonicalize() {
        return from == to;
    }
    match (to.parent().and_then(|p| p.canonicalize().ok()), to.file_name()) {
        (Some(dir), Some(name)) => dir.join(name) == from,
        _ => false,
    }
}

/// Prior QC activities that `fragment` supersedes.
///
/// A prior activity is superseded by a fragment activity when both
/// `prov:used` the same subject or session node and are associated with a
/// software agent of the same `rdfs:label`. If the fragment activity carries
/// an acquisition label, the prior activity must carry the same label.
#[must_use]
pub fn superseded_activities(prior: &Graph, fragment: &Graph) -> BTreeSet<Term> {
    let mut superseded = BTreeSet::new();
    for new in fragment.instances_of(iris::PROV_ACTIVITY) {
        let used: BTreeSet<&Term> = fragment.objects(new, iris::PROV_USED).collect();
        let software = agent_labels(fragment, new);
        let acquisitions: BTreeSet<&Term> = fragment.objects(new, iris::RDFS_LABEL).collect();

        for old in prior.instances_of(iris::PROV_ACTIVITY) {
            let same_target = prior.objects(old, iris::PROV_USED).any(|u| used.contains(u));
            let same_software = !agent_labels(prior, old).is_disjoint(&software);
            let same_acquisition = acquisitions.is_empty()
                || prior
                    .objects(old, iris::RDFS_LABEL)
                    .any(|l| acquisitions.contains(l));
            if same_target && same_software && same_acquisition {
                superseded.insert(old.clone());
            }
        }
    }
    superseded
}

fn agent_labels<'a>(graph: &'a Graph, activity: &'a Term) -> BTreeSet<&'a Term> {
    graph
        .objects(activity, iris::PROV_WAS_ASSOCIATED_WITH)
        .flat_map(|agent| graph.objects(agent, iris::RDFS_LABEL))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Literal, Triple};

    fn activity(graph: &mut Graph, id: &str, used: &str, software: &str, acq: Option<&str>) {
        let act = Term::iri(id);
        let agent = Term::iri(format!("urn:agent:{software}"));
        graph.add(&act, iris::RDF_TYPE, Term::iri(iris::PROV_ACTIVITY));
        graph.add(&act, iris::PROV_USED, Term::iri(used));
        graph.add(&act, iris::PROV_WAS_ASSOCIATED_WITH, agent.clone());
        graph.add(&agent, iris::RDFS_LABEL, Literal::string(software));
        graph.add(&act, "urn:metric", Literal::integer(1));
        if let Some(acq) = acq {
            graph.add(&act, iris::RDFS_LABEL, Literal::string(acq));
        }
    }

    #[test]
    fn mode_inference() {
        assert_eq!(Mode::infer(None, true), Mode::Update);
        assert_eq!(Mode::infer(None, false), Mode::Generate);
        assert_eq!(Mode::infer(Some(Mode::Replace), false), Mode::Replace);
        assert_eq!("Convert".parse::<Mode>(), Ok(Mode::Convert));
        assert!("merge".parse::<Mode>().is_err());
    }

    #[test]
    fn replace_scope_matches_target_software_and_acquisition() {
        let mut prior = Graph::new();
        activity(&mut prior, "urn:old-t1", "urn:ses", "mriqc", Some("T1w"));
        activity(&mut prior, "urn:old-bold", "urn:ses", "mriqc", Some("bold"));
        activity(&mut prior, "urn:other-tool", "urn:ses", "fmriprep", Some("T1w"));
        activity(&mut prior, "urn:other-ses", "urn:ses2", "mriqc", Some("T1w"));

        let mut fragment = Graph::new();
        activity(&mut fragment, "urn:new", "urn:ses", "mriqc", Some("T1w"));

        let gone = superseded_activities(&prior, &fragment);
        assert_eq!(gone, [Term::iri("urn:old-t1")].into_iter().collect());

        let mut unlabeled = Graph::new();
        activity(&mut unlabeled, "urn:new", "urn:ses", "mriqc", None);
        assert_eq!(superseded_activities(&prior, &unlabeled).len(), 2);
    }

    #[test]
    fn replace_removes_links_to_superseded_activities() {
        let dir = tempfile::tempdir().unwrap();
        let mut prior_graph = Graph::new();
        activity(&mut prior_graph, "urn:old-t1", "urn:ses", "mriqc", Some("T1w"));
        prior_graph.add(&Term::iri("urn:report"), "urn:cites", Term::iri("urn:old-t1"));
        prior_graph.add(&Term::iri("urn:report"), "urn:title", Literal::string("QC"));
        let prior = dir.path().join("in/nidm.nt");
        std::fs::create_dir_all(prior.parent().unwrap()).unwrap();
        let ns = crate::namespaces::Namespaces::standard();
        let bytes = crate::serializer::serialize(&prior_graph, GraphFormat::NTriples, &ns).unwrap();
        std::fs::write(&prior, bytes).unwrap();

        let mut fragment = Graph::new();
        activity(&mut fragment, "urn:new", "urn:ses", "mriqc", Some("T1w"));
        let out = dir.path().join("out/sub-01.nt");
        let outcome = augment(&fragment, Some(Mode::Replace), Some(&prior), |_| out.clone()).unwrap();

        let old = Term::iri("urn:old-t1");
        assert_eq!(outcome.state, MergeState::Replaced);
        assert_eq!(outcome.removed, 6);
        assert!(outcome.graph.iter().all(|t| t.subject != old && t.object != old));
        assert!(outcome
            .graph
            .objects(&Term::iri("urn:report"), "urn:title")
            .next()
            .is_some());
    }

    #[test]
    fn convert_without_prior_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = augment(&Graph::new(), Some(Mode::Convert), None, |f| {
            dir.path().join(format!("out.{}", f.extension()))
        })
        .unwrap_err();
        assert!(matches!(err, MergeError::NothingToConvert));
    }

    #[test]
    fn refuses_to_copy_onto_itself() {
        let dir = tempfile::tempdir().unwrap();
        let prior = dir.path().join("sub-01.ttl");
        std::fs::write(&prior, "<urn:a> <urn:p> <urn:o> .\n").unwrap();
        let err = augment(&Graph::new(), None, Some(&prior), |f| {
            dir.path().join(format!("sub-01.{}", f.extension()))
        })
        .unwrap_err();
        assert!(matches!(err, MergeError::OutputAliasesInput(_)));
        assert_eq!(
            std::fs::read_to_string(&prior).unwrap(),
            "<urn:a> <urn:p> <urn:o> .\n"
        );
    }

    #[test]
    fn unparsable_prior_leaves_verbatim_copy() {
        let dir = tempfile::tempdir().unwrap();
        let prior = dir.path().join("in/nidm.ttl");
        std::fs::create_dir_all(prior.parent().unwrap()).unwrap();
        std::fs::write(&prior, "this is not turtle").unwrap();
        let out = dir.path().join("out/sub-01.ttl");

        let err = augment(&Graph::new(), None, Some(&prior), |_| out.clone()).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(std::fs::read(&out).unwrap(), b"this is not turtle");
        assert_eq!(std::fs::read(&prior).unwrap(), b"this is not turtle");
    }

    #[test]
    fn generate_ignores_prior() {
        let dir = tempfile::tempdir().unwrap();
        let prior = dir.path().join("nidm.ttl");
        std::fs::write(&prior, "<urn:a> <urn:p> <urn:o> .\n").unwrap();
        let fragment: Graph = [Triple::new(Term::iri("urn:b"), "urn:p", Term::iri("urn:o"))]
            .into_iter()
            .collect();
        let out = dir.path().join("out/sub-01.ttl");
        let outcome = augment(&fragment, Some(Mode::Generate), Some(&prior), |_| out.clone()).unwrap();
        assert_eq!(outcome.state, MergeState::NoExistingGraph);
        assert_eq!(outcome.graph, fragment);
        assert!(!out.exists());
    }
}
