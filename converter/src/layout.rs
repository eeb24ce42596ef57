//! BIDS-style naming: subject/session labels, output paths, prior-graph
//! discovery and MRIQC output discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::LabelError;
use crate::serializer::GraphFormat;

/// Name of the derivative subdirectory holding all graphs.
pub const NIDM_DIR: &str = "nidm";

/// Preferred prior-graph filename inside a subject or session directory.
pub const PREFERRED_GRAPH: &str = "nidm.ttl";

/// Extensions searched (in order) when no `nidm.ttl` exists.
const GRAPH_EXTENSIONS: &[&str] = &["ttl", "jsonld", "json-ld"];

fn validate(raw: &str, prefix: &str, kind: &'static str) -> Result<String, LabelError> {
    let label = raw.trim();
    let label = label.strip_prefix(prefix).unwrap_or(label);
    if label.is_empty() {
        return Err(LabelError::Empty { kind });
    }
    if !label.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LabelError::Invalid {
            kind,
            label: label.to_owned(),
        });
    }
    Ok(label.to_owned())
}

/// A validated subject label, without the `sub-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubjectLabel(String);

impl SubjectLabel {
    /// Strips an optional `sub-` prefix and checks the rest is alphanumeric.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError`] for an empty or non-alphanumeric label.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        validate(raw, "sub-", "subject").map(Self)
    }

    /// The bare label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated session label, without the `ses-` prefix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionLabel(String);

impl SessionLabel {
    /// Strips an optional `ses-` prefix and checks the rest is alphanumeric.
    ///
    /// # Errors
    ///
    /// Returns [`LabelError`] for an empty or non-alphanumeric label.
    pub fn parse(raw: &str) -> Result<Self, LabelError> {
        validate(raw, "ses-", "session").map(Self)
    }

    /// The bare label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `sub-<id>[_ses-<label>]`, the stem shared by every per-subject output file.
#[must_use]
pub fn file_stem(subject: &SubjectLabel, session: Option<&SessionLabel>) -> String {
    match session {
        Some(ses) => format!("sub-{subject}_ses-{ses}"),
        None => format!("sub-{subject}"),
    }
}

/// Output paths under a derivative root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    /// Layout rooted at `root` (graphs go to `root/nidm/...`).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `root/nidm`.
    #[must_use]
    pub fn nidm_dir(&self) -> PathBuf {
        self.root.join(NIDM_DIR)
    }

    /// `root/nidm/sub-<id>[/ses-<label>]`.
    #[must_use]
    pub fn subject_dir(&self, subject: &SubjectLabel, session: Option<&SessionLabel>) -> PathBuf {
        let dir = self.nidm_dir().join(format!("sub-{subject}"));
        match session {
            Some(ses) => dir.join(format!("ses-{ses}")),
            None => dir,
        }
    }

    /// Graph document for one format.
    #[must_use]
    pub fn graph_path(
        &self,
        subject: &SubjectLabel,
        session: Option<&SessionLabel>,
        format: GraphFormat,
    ) -> PathBuf {
        self.subject_dir(subject, session)
            .join(format!("{}.{}", file_stem(subject, session), format.extension()))
    }

    /// Per-subject conversion summary.
    #[must_use]
    pub fn summary_path(&self, subject: &SubjectLabel, session: Option<&SessionLabel>) -> PathBuf {
        self.subject_dir(subject, session)
            .join(format!("{}_summary.json", file_stem(subject, session)))
    }

    /// BIDS derivative descriptor.
    #[must_use]
    pub fn dataset_description_path(&self) -> PathBuf {
        self.nidm_dir().join("dataset_description.json")
    }

    /// Directory for run logs.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Looks for a prior graph of `subject` (and `session`) in a NIDM input
/// directory.
///
/// Searches `sub-<id>/ses-<label>/` (when a session is given), then
/// `sub-<id>/`. In each directory `nidm.ttl` wins, then the first (sorted)
/// `*.ttl`, `*.jsonld` and `*.json-ld` file.
#[must_use]
pub fn find_existing_graph(
    nidm_input_dir: &Path,
    subject: &SubjectLabel,
    session: Option<&SessionLabel>,
) -> Option<PathBuf> {
    let subject_dir = nidm_input_dir.join(format!("sub-{subject}"));
    let mut candidates = Vec::with_capacity(2);
    if let Some(ses) = session {
        candidates.push(subject_dir.join(format!("ses-{ses}")));
    }
    candidates.push(subject_dir);

    let found = candidates.iter().find_map(|dir| search_dir(dir));
    match &found {
        Some(path) => info!(subject = %subject, path = %path.display(), "found prior graph"),
        None => debug!(subject = %subject, dir = %nidm_input_dir.display(), "no prior graph"),
    }
    found
}

fn search_dir(dir: &Path) -> Option<PathBuf> {
    let preferred = dir.join(PREFERRED_GRAPH);
    if preferred.is_file() {
        return Some(preferred);
    }
    let entries = std::fs::read_dir(dir).ok()?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    GRAPH_EXTENSIONS.iter().find_map(|ext| {
        files
            .iter()
            .find(|p| p.extension().and_then(|e| e.to_str()) == Some(*ext))
            .cloned()
    })
}

fn entity_pattern() -> Option<&'static Regex> {
    static ENTITY: OnceLock<Option<Regex>> = OnceLock::new();
    ENTITY
        .get_or_init(|| Regex::new(r"^(?P<key>[A-Za-z]+)-(?P<value>[A-Za-z0-9]+)$").ok())
        .as_ref()
}

/// BIDS entities parsed from an MRIQC output filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidsEntities {
    /// `sub-` entity.
    pub subject: SubjectLabel,
    /// `ses-` entity, from the filename or a `ses-*` parent directory.
    pub session: Option<SessionLabel>,
    /// `task-` entity.
    pub task: Option<String>,
    /// `run-` entity.
    pub run: Option<String>,
    /// Trailing suffix (`T1w`, `bold`, ...).
    pub suffix: Option<String>,
    /// Filename without extension.
    pub stem: String,
}

impl BidsEntities {
    /// Parses the entities of `path`. Returns `None` for files that are not
    /// named `sub-<label>_...`.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let pattern = entity_pattern()?;
        let stem = path.file_stem()?.to_str()?.to_owned();

        let mut subject = None;
        let mut session = None;
        let mut task = None;
        let mut run = None;
        let mut suffix = None;
        for part in stem.split('_') {
            match pattern.captures(part) {
                Some(caps) => {
                    let value = &caps["value"];
                    match &caps["key"] {
                        "sub" => subject = SubjectLabel::parse(value).ok(),
                        "ses" => session = SessionLabel::parse(value).ok(),
                        "task" => task = Some(value.to_owned()),
                        "run" => run = Some(value.to_owned()),
                        _ => {}
                    }
                }
                None => suffix = Some(part.to_owned()),
            }
        }
        if session.is_none() {
            session = path
                .ancestors()
                .skip(1)
                .filter_map(|a| a.file_name()?.to_str())
                .find_map(|name| name.strip_prefix("ses-"))
                .and_then(|label| SessionLabel::parse(label).ok());
        }

        Some(Self {
            subject: subject?,
            session,
            task,
            run,
            suffix,
            stem,
        })
    }

    /// The filename stem without its `sub-` and `ses-` entities, naming the
    /// acquisition within a session (e.g. `T1w`, `task-rest_run-1_bold`).
    #[must_use]
    pub fn acquisition(&self) -> String {
        let rest: Vec<&str> = self
            .stem
            .split('_')
            .filter(|p| !p.starts_with("sub-") && !p.starts_with("ses-"))
            .collect();
        if rest.is_empty() {
            self.stem.clone()
        } else {
            rest.join("_")
        }
    }
}

/// One MRIQC metrics file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFile {
    /// Location of the JSON document.
    pub path: PathBuf,
    /// Entities parsed from its name.
    pub entities: BidsEntities,
}

/// Scans grouped by subject and session, in sorted order.
pub type ScanIndex = BTreeMap<(SubjectLabel, Option<SessionLabel>), Vec<ScanFile>>;

/// Walks an MRIQC output directory for per-scan metrics files.
///
/// Takes `sub-*.json` files, skipping `*_timeseries.json` and anything whose
/// name does not parse as BIDS. Unreadable directory entries are skipped with
/// a warning.
#[must_use]
pub fn discover_scans(mriqc_dir: &Path) -> ScanIndex {
    let mut index = ScanIndex::new();
    let walker = WalkDir::new(mriqc_dir).sort_by_file_name().into_iter();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry in MRIQC directory");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with("sub-")
            || !name.ends_with(".json")
            || name.ends_with("_timeseries.json")
        {
            continue;
        }
        let Some(entities) = BidsEntities::from_path(path) else {
            debug!(path = %path.display(), "ignoring JSON file with no BIDS subject");
            continue;
        };
        index
            .entry((entities.subject.clone(), entities.session.clone()))
            .or_default()
            .push(ScanFile {
                path: path.to_path_buf(),
                entities,
            });
    }
    info!(
        dir = %mriqc_dir.display(),
        groups = index.len(),
        "discovered MRIQC metrics files"
    );
    index
}
