//! [`MetricRecord`] → [`GraphFragment`].
//!
//! Every fragment describes one QC activity: who it was about (the subject or
//! session node), what ran it (a software agent) and when (a timestamp taken
//! from the supplied [`Clock`]). Each metric becomes exactly one statement
//! hanging off the activity. Its predicate comes from the data dictionary when
//! the key is known, and from the fallback namespace otherwise.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use tracing::debug;

use crate::dictionary::DictionaryIndex;
use crate::flatten::{MetricRecord, MetricValue, ABSENT};
use crate::merge::Mode;
use crate::model::iris;
use crate::model::{Graph, Literal, Term};
use crate::namespaces::encode_local;

/// Source of the current time for activity timestamps.
pub trait Clock {
    /// Current UTC instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at one instant, for reproducible output.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Name and version of the QC software that produced the metrics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoftwareAgent {
    /// Software name, e.g. `mriqc`.
    pub name: String,
    /// Software version string.
    pub version: String,
}

impl SoftwareAgent {
    /// Name used when the metrics carry no provenance block.
    pub const DEFAULT_NAME: &'static str = "mriqc";
    /// Version used when the metrics carry no provenance block.
    pub const UNKNOWN_VERSION: &'static str = "unknown";

    /// Builds an agent from explicit values.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Reads `provenance.software` and `provenance.version` from a raw MRIQC
    /// document.
    #[must_use]
    pub fn from_provenance(document: &Value) -> Self {
        let field = |name: &str| {
            document
                .get("provenance")
                .and_then(|p| p.get(name))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };
        Self::new(
            field("software").unwrap_or(Self::DEFAULT_NAME),
            field("version").unwrap_or(Self::UNKNOWN_VERSION),
        )
    }

    /// IRI of the agent node.
    #[must_use]
    pub fn node(&self) -> Term {
        Term::iri(format!(
            "{}software_{}_{}",
            iris::NIIRI,
            encode_local(&self.name),
            encode_local(&self.version)
        ))
    }
}

impl Default for SoftwareAgent {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NAME, Self::UNKNOWN_VERSION)
    }
}

/// Everything the mapper needs besides the record and dictionary.
#[derive(Debug, Clone)]
pub struct MappingContext {
    /// Mode the fragment is produced for; recorded in the fragment.
    pub mode: Mode,
    /// QC software identity.
    pub software: SoftwareAgent,
    /// Acquisition label (e.g. `T1w`, `task-rest_bold`), distinguishing
    /// activities of one session.
    pub acquisition: Option<String>,
    /// Position among records of one job sharing the same acquisition
    /// label, so each still gets its own activity.
    pub ordinal: Option<usize>,
    /// Metrics file the record came from.
    pub source: Option<PathBuf>,
    /// Namespace for keys missing from the dictionary.
    pub fallback_namespace: String,
    /// Emit `rdfs:comment` / `nidm:unitCode` for dictionary predicates.
    pub describe_terms: bool,
}

impl MappingContext {
    /// Context with the default fallback namespace and no acquisition or
    /// source.
    #[must_use]
    pub fn new(mode: Mode, software: SoftwareAgent) -> Self {
        Self {
            mode,
            software,
            acquisition: None,
            ordinal: None,
            source: None,
            fallback_namespace: iris::QC_RAW.to_owned(),
            describe_terms: false,
        }
    }
}

/// Where a metric's predicate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSource {
    /// Data dictionary hit.
    Dictionary,
    /// Fallback namespace.
    Fallback,
}

/// How one metric was mapped, for verbose reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDecision {
    /// Flattened metric key.
    pub key: String,
    /// Predicate IRI used.
    pub predicate: String,
    /// Dictionary or fallback.
    pub source: TermSource,
    /// Coerced value.
    pub value: Literal,
}

/// Statements produced from one or more metric records of a subject/session.
#[derive(Debug, Clone)]
pub struct GraphFragment {
    /// The statements.
    pub graph: Graph,
    /// QC activity nodes, one per mapped record.
    pub activities: Vec<Term>,
    /// Metrics whose predicate came from the dictionary.
    pub mapped: usize,
    /// Metrics mapped to the fallback namespace.
    pub fallback: usize,
    /// Per-metric decisions, in record order.
    pub decisions: Vec<MappingDecision>,
    /// Mode the fragment was produced for.
    pub mode: Mode,
}

impl GraphFragment {
    /// Number of metric statements in the graph: statements about an
    /// activity other than the activity's own description.
    #[must_use]
    pub fn metric_statements(&self) -> usize {
        let activities: BTreeSet<&Term> = self.activities.iter().collect();
        self.graph
            .iter()
            .filter(|t| {
                activities.contains(&t.subject) && !ACTIVITY_PREDICATES.contains(&t.predicate.as_str())
            })
            .count()
    }

    /// Folds another fragment of the same subject/session into this one.
    pub fn absorb(&mut self, other: GraphFragment) {
        self.graph.union_with(&other.graph);
        self.activities.extend(other.activities);
        self.mapped += other.mapped;
        self.fallback += other.fallback;
        self.decisions.extend(other.decisions);
    }
}

/// Predicates describing the activity itself. Metrics never use them.
const ACTIVITY_PREDICATES: &[&str] = &[
    iris::RDF_TYPE,
    iris::PROV_STARTED_AT_TIME,
    iris::PROV_WAS_ASSOCIATED_WITH,
    iris::PROV_USED,
    iris::RDFS_LABEL,
    iris::DCT_SOURCE,
];

/// IRI of a subject's node.
#[must_use]
pub fn subject_node(subject_id: &str) -> Term {
    Term::iri(format!("{}sub-{}", iris::NIIRI, encode_local(subject_id)))
}

/// IRI of a session's node.
#[must_use]
pub fn session_node(subject_id: &str, session_id: &str) -> Term {
    Term::iri(format!(
        "{}sub-{}_ses-{}",
        iris::NIIRI,
        encode_local(subject_id),
        encode_local(session_id)
    ))
}

/// Maps a record to its graph fragment.
#[must_use]
pub fn map_to_graph(
    record: &MetricRecord,
    dictionary: &DictionaryIndex,
    context: &MappingContext,
    clock: &dyn Clock,
) -> GraphFragment {
    let started = clock.now();
    let mut graph = Graph::new();

    let subject_id = record.subject_id();
    let subject = subject_node(subject_id);
    graph.add(&subject, iris::RDF_TYPE, Term::iri(iris::PROV_AGENT));
    graph.add(&subject, iris::RDF_TYPE, Term::iri(iris::PROV_PERSON));
    graph.add(&subject, iris::NDAR_SRC_SUBJECT_ID, Literal::string(subject_id));

    let (used, session_part) = match record.session_id() {
        Some(session_id) => {
            let session = session_node(subject_id, session_id);
            graph.add(&session, iris::RDF_TYPE, Term::iri(iris::NIDM_SESSION));
            graph.add(&session, iris::DCT_IS_PART_OF, subject.clone());
            graph.add(&session, iris::NIDM_SESSION_LABEL, Literal::string(session_id));
            (session, format!("_ses-{}", encode_local(session_id)))
        }
        None => (subject, String::new()),
    };

    let agent = context.software.node();
    graph.add(&agent, iris::RDF_TYPE, Term::iri(iris::PROV_SOFTWARE_AGENT));
    graph.add(&agent, iris::RDFS_LABEL, Literal::string(&context.software.name));
    graph.add(
        &agent,
        iris::SDO_SOFTWARE_VERSION,
        Literal::string(&context.software.version),
    );

    let acquisition_part = context
        .acquisition
        .as_deref()
        .map(|acq| format!("_{}", encode_local(acq)))
        .unwrap_or_default();
    let ordinal_part = context
        .ordinal
        .map(|n| format!("_scan{n}"))
        .unwrap_or_default();
    let activity = Term::iri(format!(
        "{}qc_sub-{}{session_part}{acquisition_part}{ordinal_part}_{}",
        iris::NIIRI,
        encode_local(subject_id),
        started.format("%Y%m%dT%H%M%SZ"),
    ));
    graph.add(&activity, iris::RDF_TYPE, Term::iri(iris::PROV_ACTIVITY));
    graph.add(
        &activity,
        iris::PROV_STARTED_AT_TIME,
        Literal::typed(
            started.to_rfc3339_opts(SecondsFormat::Secs, true),
            iris::XSD_DATETIME,
        ),
    );
    graph.add(&activity, iris::PROV_WAS_ASSOCIATED_WITH, agent);
    graph.add(&activity, iris::PROV_USED, used);
    if let Some(acq) = &context.acquisition {
        graph.add(&activity, iris::RDFS_LABEL, Literal::string(acq));
    }
    if let Some(source) = &context.source {
        graph.add(
            &activity,
            iris::DCT_SOURCE,
            Literal::string(source.display().to_string()),
        );
    }

    let mut mapped = 0;
    let mut fallback = 0;
    let mut decisions = Vec::with_capacity(record.len());
    let mut taken: BTreeSet<String> = ACTIVITY_PREDICATES.iter().map(|p| (*p).to_owned()).collect();
    for (key, value) in record.metrics() {
        let literal = coerce(value);
        let entry = dictionary
            .lookup(key)
            .filter(|entry| !taken.contains(&entry.semantic_term));
        let (predicate, source) = match entry {
            Some(entry) => {
                mapped += 1;
                if context.describe_terms {
                    let term = Term::iri(&entry.semantic_term);
                    if !entry.description.is_empty() {
                        graph.add(&term, iris::RDFS_COMMENT, Literal::string(&entry.description));
                    }
                    if let Some(unit) = &entry.unit {
                        graph.add(&term, iris::NIDM_UNIT_CODE, Literal::string(unit));
                    }
                }
                (entry.semantic_term.clone(), TermSource::Dictionary)
            }
            None => {
                fallback += 1;
                let base = fallback_predicate(&context.fallback_namespace, key);
                let mut predicate = base.clone();
                let mut n = 1;
                while taken.contains(&predicate) {
                    n += 1;
                    predicate = format!("{base}~{n}");
                }
                (predicate, TermSource::Fallback)
            }
        };
        taken.insert(predicate.clone());
        debug!(key = %key, predicate = %predicate, ?source, value = %literal.lexical, "mapped metric");
        graph.add(&activity, &predicate, literal.clone());
        decisions.push(MappingDecision {
            key: key.clone(),
            predicate,
            source,
            value: literal,
        });
    }

    GraphFragment {
        graph,
        activities: vec![activity],
        mapped,
        fallback,
        decisions,
        mode: context.mode,
    }
}

/// Predicate for a key missing from the dictionary.
#[must_use]
pub fn fallback_predicate(namespace: &str, key: &str) -> String {
    format!("{namespace}{}", encode_local(key))
}

/// Coerces a metric value to a typed literal.
///
/// Strings are tried, after trimming, as an integer, then a finite float,
/// then `true`/`false` in any case; anything else stays a string with its
/// original text.
#[must_use]
pub fn coerce(value: &MetricValue) -> Literal {
    match value {
        MetricValue::Number(n) if n.is_i64() || n.is_u64() => {
            Literal::typed(n.to_string(), iris::XSD_INTEGER)
        }
        MetricValue::Number(n) => Literal::typed(n.to_string(), iris::XSD_DOUBLE),
        MetricValue::Bool(b) => Literal::boolean(*b),
        MetricValue::Absent => Literal::string(ABSENT),
        MetricValue::Text(text) => coerce_text(text),
    }
}

fn coerce_text(text: &str) -> Literal {
    let trimmed = text.trim();
    if trimmed.parse::<i128>().is_ok() {
        return Literal::typed(trimmed, iris::XSD_INTEGER);
    }
    if trimmed.parse::<f64>().is_ok_and(f64::is_finite) {
        return Literal::typed(trimmed, iris::XSD_DOUBLE);
    }
    if trimmed.eq_ignore_ascii_case("true") || trimmed.eq_ignore_ascii_case("false") {
        return Literal::boolean(trimmed.eq_ignore_ascii_case("true"));
    }
    Literal::string(text)
}
