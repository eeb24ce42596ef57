//! Per-subject orchestration.
//!
//! A [`SubjectJob`] names one subject (and optionally one session), the MRIQC
//! metrics documents of its scans and, optionally, a prior graph. The
//! [`Converter`] turns it into graph documents under an [`OutputLayout`]:
//!
//! 1. each scan's document is stripped of metadata, flattened and mapped;
//! 2. the per-scan fragments are unioned;
//! 3. the union is merged into the prior graph (copy-before-modify);
//! 4. the result is serialized in every configured format, plus the prior
//!    graph's own format so its copy is brought up to date;
//! 5. a JSON summary is written next to the graphs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::ConverterConfig;
use crate::dictionary::DictionaryIndex;
use crate::error::{ConversionError, DictionaryLoadError, MalformedMetricsError, SerializationError};
use crate::flatten::{flatten, strip_metadata};
use crate::layout::{find_existing_graph, OutputLayout, ScanFile, ScanIndex, SessionLabel, SubjectLabel};
use crate::mapper::{map_to_graph, Clock, GraphFragment, MappingContext, SoftwareAgent, SystemClock, TermSource};
use crate::merge::{augment, MergeState, Mode};
use crate::model::{Graph, Term};
use crate::namespaces::Namespaces;
use crate::serializer::{serialize_all, write_atomic, GraphFormat};

/// Name recorded in `dataset_description.json`.
pub const CONVERTER_NAME: &str = "MRIQC-NIDM";

const HOW_TO_ACKNOWLEDGE: &str = "Please cite MRIQC (https://doi.org/10.1371/journal.pone.0184661) and NIDM (http://nidm.nidash.org/)";

#[derive(Debug, Clone)]
enum MetricsSource {
    File(PathBuf),
    Document(Value),
}

/// One scan's metrics document.
#[derive(Debug, Clone)]
pub struct ScanInput {
    source: MetricsSource,
    acquisition: Option<String>,
}

impl ScanInput {
    /// A metrics file, read when the job runs.
    pub fn file(path: impl Into<PathBuf>, acquisition: Option<String>) -> Self {
        Self {
            source: MetricsSource::File(path.into()),
            acquisition,
        }
    }

    /// An already parsed metrics document.
    #[must_use]
    pub fn document(document: Value, acquisition: Option<String>) -> Self {
        Self {
            source: MetricsSource::Document(document),
            acquisition,
        }
    }

    /// Acquisition label distinguishing this scan within its session.
    #[must_use]
    pub fn acquisition(&self) -> Option<&str> {
        self.acquisition.as_deref()
    }

    fn path(&self) -> Option<&Path> {
        match &self.source {
            MetricsSource::File(path) => Some(path),
            MetricsSource::Document(_) => None,
        }
    }
}

impl From<&ScanFile> for ScanInput {
    fn from(scan: &ScanFile) -> Self {
        Self::file(&scan.path, Some(scan.entities.acquisition()))
    }
}

/// Everything needed to convert one subject or session.
#[derive(Debug, Clone)]
pub struct SubjectJob {
    /// Subject label.
    pub subject: SubjectLabel,
    /// Session label, if the data is organised by session.
    pub session: Option<SessionLabel>,
    /// Metrics documents; may be empty in convert mode.
    pub scans: Vec<ScanInput>,
    /// Explicit mode, or `None` to infer it.
    pub mode: Option<Mode>,
    /// Prior graph to augment.
    pub prior: Option<PathBuf>,
}

impl SubjectJob {
    /// A job with no scans, no prior graph and an inferred mode.
    #[must_use]
    pub fn new(subject: SubjectLabel, session: Option<SessionLabel>) -> Self {
        Self {
            subject,
            session,
            scans: Vec::new(),
            mode: None,
            prior: None,
        }
    }

    /// Looks up the prior graph in a NIDM input directory.
    #[must_use]
    pub fn with_prior_from(mut self, nidm_input_dir: &Path) -> Self {
        self.prior = find_existing_graph(nidm_input_dir, &self.subject, self.session.as_ref());
        self
    }

    fn label(&self) -> (String, String) {
        (
            self.subject.to_string(),
            self.session
                .as_ref()
                .map(|ses| format!("_ses-{ses}"))
                .unwrap_or_default(),
        )
    }
}

/// One written graph document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WrittenGraph {
    /// Format of the document.
    pub format: GraphFormat,
    /// Where it was written.
    pub path: PathBuf,
}

/// A format that could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedFormat {
    /// The format.
    pub format: GraphFormat,
    /// Rendered error.
    pub error: String,
}

/// What a conversion did; written as `<stem>_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionSummary {
    /// Subject label.
    pub subject: String,
    /// Session label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Applied mode.
    pub mode: Mode,
    /// Final merge state.
    pub state: MergeState,
    /// Metrics documents converted.
    pub scans: usize,
    /// Metric statements generated.
    pub metrics: usize,
    /// Metrics mapped through the dictionary.
    pub dictionary_terms: usize,
    /// Metrics mapped to the fallback namespace.
    pub fallback_terms: usize,
    /// Keys that fell back, in record order.
    pub fallback_keys: Vec<String>,
    /// Statements added to the output graph.
    pub added: usize,
    /// Statements removed in replace mode.
    pub removed: usize,
    /// Statements in the output graph.
    pub statements: usize,
    /// QC activity nodes created.
    pub activities: Vec<String>,
    /// Prior graph that was augmented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_graph: Option<PathBuf>,
    /// Graph documents written.
    pub outputs: Vec<WrittenGraph>,
    /// Formats that failed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_formats: Vec<FailedFormat>,
    /// When the conversion ran (UTC, RFC 3339).
    pub generated_at: String,
}

/// Subject/session selection for [`Converter::jobs_from_scans`].
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Explicit mode for every job.
    pub mode: Option<Mode>,
    /// Directory searched for prior graphs.
    pub nidm_input_dir: Option<PathBuf>,
    /// Subjects to convert; all when empty.
    pub participants: Vec<SubjectLabel>,
    /// Sessions to convert; all when empty.
    pub sessions: Vec<SessionLabel>,
}

/// Outcome of a batch: per-subject successes and failures.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Successful conversions.
    pub converted: Vec<ConversionSummary>,
    /// Failed jobs, labelled `sub-<id>[_ses-<label>]`.
    pub failed: Vec<(String, ConversionError)>,
}

impl BatchReport {
    /// Returns true when every job succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives conversions with one dictionary, prefix registry and clock.
pub struct Converter {
    dictionary: DictionaryIndex,
    namespaces: Namespaces,
    config: ConverterConfig,
    layout: OutputLayout,
    clock: Box<dyn Clock>,
}

impl Converter {
    /// Builds a converter, loading the configured dictionary (or the packaged
    /// one).
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryLoadError`] if the dictionary cannot be loaded.
    pub fn new(config: ConverterConfig, layout: OutputLayout) -> Result<Self, DictionaryLoadError> {
        let namespaces = config.namespaces();
        let dictionary = match &config.dictionary {
            Some(path) => DictionaryIndex::load(path, &namespaces)?,
            None => DictionaryIndex::packaged(&namespaces)?,
        };
        info!(entries = dictionary.len(), "loaded data dictionary");
        Ok(Self::with_dictionary(config, layout, dictionary))
    }

    /// Builds a converter around an already loaded dictionary.
    #[must_use]
    pub fn with_dictionary(
        config: ConverterConfig,
        layout: OutputLayout,
        dictionary: DictionaryIndex,
    ) -> Self {
        Self {
            namespaces: config.namespaces(),
            dictionary,
            config,
            layout,
            clock: Box::new(SystemClock),
        }
    }

    /// Replaces the clock used for activity timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// The output layout.
    #[must_use]
    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Converts one subject or session.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] when a metrics file cannot be read or
    /// flattened, when merging fails, or when no output format could be
    /// written. A prior graph is never modified, whatever the outcome.
    pub fn convert(&self, job: &SubjectJob) -> Result<ConversionSummary, ConversionError> {
        let (subject, session) = job.label();
        let started = self.clock.now();

        let explicit = job.mode;
        let scans: &[ScanInput] = if explicit == Some(Mode::Convert) {
            if !job.scans.is_empty() {
                warn!(%subject, scans = job.scans.len(), "convert mode ignores metrics documents");
            }
            &[]
        } else if job.scans.is_empty() {
            return Err(ConversionError::NoMetrics { subject, session });
        } else {
            &job.scans
        };

        let mode = Mode::infer(explicit, job.prior.as_deref().is_some_and(Path::is_file));
        let mut fragment: Option<GraphFragment> = None;
        for (scan, ordinal) in scans.iter().zip(scan_ordinals(scans)) {
            let next = self.map_scan(job, scan, mode, ordinal)?;
            match &mut fragment {
                Some(acc) => acc.absorb(next),
                None => fragment = Some(next),
            }
        }

        let empty = Graph::new();
        let graph = fragment.as_ref().map_or(&empty, |f| &f.graph);
        let outcome = augment(graph, explicit, job.prior.as_deref(), |format| {
            self.layout.graph_path(&job.subject, job.session.as_ref(), format)
        })
        .map_err(|source| ConversionError::Merge {
            subject: subject.clone(),
            session: session.clone(),
            source,
        })?;

        let mut formats = self.config.formats.clone();
        if let Some(prior) = &outcome.prior {
            if !formats.contains(&prior.format) {
                formats.push(prior.format);
            }
        }

        let mut outputs = Vec::new();
        let mut failed_formats = Vec::new();
        for (format, result) in serialize_all(&outcome.graph, &formats, &self.namespaces) {
            let path = self.layout.graph_path(&job.subject, job.session.as_ref(), format);
            match result.and_then(|bytes| write_atomic(&path, &bytes)) {
                Ok(()) => {
                    info!(%format, path = %path.display(), "wrote graph");
                    outputs.push(WrittenGraph { format, path });
                }
                Err(err) => {
                    warn!(%format, error = %err, "could not write format");
                    failed_formats.push(FailedFormat {
                        format,
                        error: err.to_string(),
                    });
                }
            }
        }
        if outputs.is_empty() {
            return Err(ConversionError::NoOutput { subject, session });
        }

        let (mapped, fallback, activities, fallback_keys) = match &fragment {
            Some(f) => (
                f.mapped,
                f.fallback,
                f.activities
                    .iter()
                    .filter_map(Term::as_iri)
                    .map(str::to_owned)
                    .collect(),
                f.decisions
                    .iter()
                    .filter(|d| d.source == TermSource::Fallback)
                    .map(|d| d.key.clone())
                    .collect(),
            ),
            None => (0, 0, Vec::new(), Vec::new()),
        };
        let summary = ConversionSummary {
            subject: job.subject.to_string(),
            session: job.session.as_ref().map(ToString::to_string),
            mode: outcome.mode,
            state: outcome.state,
            scans: scans.len(),
            metrics: mapped + fallback,
            dictionary_terms: mapped,
            fallback_terms: fallback,
            fallback_keys,
            added: outcome.added,
            removed: outcome.removed,
            statements: outcome.graph.len(),
            activities,
            prior_graph: outcome.prior.map(|p| p.source),
            outputs,
            failed_formats,
            generated_at: started.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        };
        self.write_summary(job, &summary)?;
        info!(
            subject = %summary.subject,
            mode = %summary.mode,
            state = %summary.state,
            metrics = summary.metrics,
            fallback = summary.fallback_terms,
            statements = summary.statements,
            "converted subject"
        );
        Ok(summary)
    }

    fn map_scan(
        &self,
        job: &SubjectJob,
        scan: &ScanInput,
        mode: Mode,
        ordinal: Option<usize>,
    ) -> Result<GraphFragment, ConversionError> {
        let (subject, session) = job.label();
        let metrics_err = |source| ConversionError::Metrics {
            subject: subject.clone(),
            session: session.clone(),
            source,
        };
        let mut document = match &scan.source {
            MetricsSource::Document(doc) => doc.clone(),
            MetricsSource::File(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConversionError::ReadMetrics {
                        path: path.clone(),
                        source,
                    }
                })?;
                serde_json::from_str(&text)
                    .map_err(|e| metrics_err(MalformedMetricsError::InvalidJson(e)))?
            }
        };

        let mut software = SoftwareAgent::from_provenance(&document);
        if let Some(name) = &self.config.software_name {
            software.name.clone_from(name);
        }
        if let Some(version) = &self.config.software_version {
            software.version.clone_from(version);
        }

        let stripped = strip_metadata(&mut document, &self.config.exclude_keys);
        let record = flatten(
            &document,
            job.subject.as_str(),
            job.session.as_ref().map(SessionLabel::as_str),
        )
        .map_err(metrics_err)?;

        let mut context = MappingContext::new(mode, software);
        context.acquisition = scan.acquisition.clone();
        context.ordinal = ordinal;
        context.source = scan.path().map(Path::to_path_buf);
        context.fallback_namespace.clone_from(&self.config.fallback_namespace);
        context.describe_terms = self.config.describe_terms;

        let fragment = map_to_graph(&record, &self.dictionary, &context, self.clock.as_ref());
        info!(
            subject = %subject,
            acquisition = scan.acquisition().unwrap_or("-"),
            metrics = record.len(),
            stripped,
            fallback = fragment.fallback,
            "mapped scan"
        );
        Ok(fragment)
    }

    fn write_summary(
        &self,
        job: &SubjectJob,
        summary: &ConversionSummary,
    ) -> Result<(), SerializationError> {
        let path = self.layout.summary_path(&job.subject, job.session.as_ref());
        let mut bytes = serde_json::to_vec_pretty(summary)?;
        bytes.push(b'\n');
        write_atomic(&path, &bytes)
    }

    /// Turns discovered scans into jobs, honouring the participant and
    /// session filters.
    #[must_use]
    pub fn jobs_from_scans(index: &ScanIndex, options: &BatchOptions) -> Vec<SubjectJob> {
        index
            .iter()
            .filter(|((sub, _), _)| {
                options.participants.is_empty() || options.participants.contains(sub)
            })
            .filter(|((_, ses), _)| {
                options.sessions.is_empty()
                    || ses.as_ref().is_some_and(|s| options.sessions.contains(s))
            })
            .map(|((sub, ses), scans)| {
                let mut job = SubjectJob::new(sub.clone(), ses.clone());
                job.scans = scans.iter().map(ScanInput::from).collect();
                job.mode = options.mode;
                match &options.nidm_input_dir {
                    Some(dir) => job.with_prior_from(dir),
                    None => job,
                }
            })
            .collect()
    }

    /// Runs every job. A failing job is logged and recorded; the rest still
    /// run.
    pub fn convert_all(&self, jobs: &[SubjectJob]) -> BatchReport {
        let mut report = BatchReport::default();
        for job in jobs {
            let (subject, session) = job.label();
            match self.convert(job) {
                Ok(summary) => report.converted.push(summary),
                Err(err) => {
                    warn!(subject = %subject, session = %session, error = %err, "conversion failed");
                    report.failed.push((format!("sub-{subject}{session}"), err));
                }
            }
        }
        info!(
            converted = report.converted.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        report
    }
}

/// Numbers scans that share an acquisition label (1, 2, ...) so each maps to
/// its own activity. Scans with a unique label get `None`.
fn scan_ordinals(scans: &[ScanInput]) -> Vec<Option<usize>> {
    let mut totals: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    for scan in scans {
        *totals.entry(scan.acquisition()).or_default() += 1;
    }
    let mut seen: BTreeMap<Option<&str>, usize> = BTreeMap::new();
    scans
        .iter()
        .map(|scan| {
            let label = scan.acquisition();
            if totals.get(&label).copied().unwrap_or_default() < 2 {
                return None;
            }
            let n = seen.entry(label).or_default();
            *n += 1;
            Some(*n)
        })
        .collect()
}

/// Writes the BIDS derivative descriptor `nidm/dataset_description.json`.
///
/// # Errors
///
/// Returns [`SerializationError`] if the file cannot be written.
pub fn write_dataset_description(
    layout: &OutputLayout,
    software: &SoftwareAgent,
) -> Result<PathBuf, SerializationError> {
    let description = json!({
        "Name": "MRIQC Quality Control Metrics (NIDM)",
        "BIDSVersion": "1.6.0",
        "DatasetType": "derivative",
        "GeneratedBy": [
            {
                "Name": CONVERTER_NAME,
                "Version": env!("CARGO_PKG_VERSION"),
                "CodeURL": env!("CARGO_PKG_REPOSITORY"),
            },
            {
                "Name": software.name,
                "Version": software.version,
            }
        ],
        "HowToAcknowledge": HOW_TO_ACKNOWLEDGE,
    });
    let path = layout.dataset_description_path();
    let mut bytes = serde_json::to_vec_pretty(&description)?;
    bytes.push(b'\n');
    write_atomic(&path, &bytes)?;
    info!(path = %path.display(), "wrote dataset description");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::FixedClock;
    use chrono::{TimeZone, Utc};

    fn converter(root: &Path) -> Converter {
        Converter::new(ConverterConfig::default(), OutputLayout::new(root))
            .unwrap()
            .with_clock(FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()))
    }

    fn job(scans: Vec<ScanInput>) -> SubjectJob {
        let mut job = SubjectJob::new(SubjectLabel::parse("01").unwrap(), None);
        job.scans = scans;
        job
    }

    #[test]
    fn writes_default_formats_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let summary = conv
            .convert(&job(vec![ScanInput::document(
                json!({"cjv": 0.41, "custom": {"x": 1}, "provenance": {"version": "24.0.0"}}),
                Some("T1w".to_owned()),
            )]))
            .unwrap();

        assert_eq!(summary.mode, Mode::Generate);
        assert_eq!(summary.state, MergeState::NoExistingGraph);
        assert_eq!(summary.metrics, 2);
        assert_eq!(summary.fallback_keys, vec!["custom.x".to_owned()]);
        assert_eq!(summary.outputs.len(), 2);
        for out in &summary.outputs {
            assert!(out.path.is_file());
        }
        let text = std::fs::read_to_string(dir.path().join("nidm/sub-01/sub-01_summary.json")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["state"], "no_existing_graph");
        assert_eq!(value["generated_at"], "2024-05-01T08:00:00Z");
    }

    #[test]
    fn same_label_scans_get_separate_activities() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let scan = || ScanInput::document(json!({"cjv": 0.41}), Some("T1w".to_owned()));
        let summary = conv.convert(&job(vec![scan(), scan()])).unwrap();

        assert_eq!(summary.activities.len(), 2);
        assert_ne!(summary.activities[0], summary.activities[1]);
        assert!(summary.activities[0].contains("_T1w_scan1_"));
        assert_eq!(summary.metrics, 2);
    }

    #[test]
    fn ordinals_only_for_repeated_labels() {
        let scans = [
            ScanInput::document(json!({}), Some("T1w".to_owned())),
            ScanInput::document(json!({}), Some("bold".to_owned())),
            ScanInput::document(json!({}), Some("T1w".to_owned())),
            ScanInput::document(json!({}), None),
        ];
        assert_eq!(scan_ordinals(&scans), vec![Some(1), None, Some(2), None]);
    }

    #[test]
    fn missing_metrics_are_reported_per_subject() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let err = conv.convert(&job(Vec::new())).unwrap_err();
        assert_eq!(err.to_string(), "sub-01: no metrics to convert");

        let mut bad = job(vec![ScanInput::document(json!([1, 2]), None)]);
        bad.session = Some(SessionLabel::parse("a").unwrap());
        let err = conv.convert(&bad).unwrap_err();
        assert!(err.to_string().starts_with("sub-01_ses-a:"), "{err}");
    }

    #[test]
    fn batch_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let conv = converter(dir.path());
        let good = job(vec![ScanInput::document(json!({"cjv": 1}), None)]);
        let mut bad = job(vec![ScanInput::file(dir.path().join("missing.json"), None)]);
        bad.subject = SubjectLabel::parse("02").unwrap();
        let report = conv.convert_all(&[bad, good]);
        assert_eq!(report.converted.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "sub-02");
        assert!(!report.is_success());
    }

    #[test]
    fn dataset_description_names_both_tools() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path());
        let path = write_dataset_description(&layout, &SoftwareAgent::new("mriqc", "24.0.0")).unwrap();
        let value: Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["DatasetType"], "derivative");
        assert_eq!(value["BIDSVersion"], "1.6.0");
        assert_eq!(value["GeneratedBy"][0]["Name"], CONVERTER_NAME);
        assert_eq!(value["GeneratedBy"][1]["Version"], "24.0.0");
    }
}
