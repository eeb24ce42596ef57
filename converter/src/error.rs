//! Error types for the conversion pipeline.
//!
//! Each stage has its own error so callers can tell fatal failures
//! (dictionary, malformed metrics) from recoverable ones (a prior graph that
//! does not parse, a single output format that cannot be written).

use std::path::PathBuf;

/// The data dictionary could not be loaded. Fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum DictionaryLoadError {
    /// The file is missing or unreadable.
    #[error("cannot read data dictionary {path}: {source}")]
    Io {
        /// Dictionary path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not well-formed CSV.
    #[error("malformed data dictionary {origin}: {source}")]
    Csv {
        /// Dictionary path, or `<packaged>` for the built-in table.
        origin: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A required column is absent from the header row.
    #[error("data dictionary {origin} has no `{column}` column")]
    MissingColumn {
        /// Dictionary path, or `<packaged>`.
        origin: String,
        /// Canonical name of the missing column.
        column: &'static str,
    },
}

/// The QC metrics input is unusable. Fatal for that subject only.
#[derive(Debug, thiserror::Error)]
pub enum MalformedMetricsError {
    /// The document is not valid JSON.
    #[error("metrics document is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// The top-level JSON value is not an object.
    #[error("metrics document must be a JSON object at the top level, found {found}")]
    NotAnObject {
        /// JSON type name of the value that was found.
        found: &'static str,
    },

    /// The subject identifier is empty.
    #[error("subject identifier must not be empty")]
    EmptySubject,
}

/// A serialized graph could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum GraphParseError {
    /// Syntax error reported by the parser.
    #[error("{format} syntax error: {message}")]
    Syntax {
        /// Format name.
        format: &'static str,
        /// Parser message.
        message: String,
    },

    /// A term kind that cannot appear in a provenance graph (e.g. RDF-star).
    #[error("unsupported term in {format} document: {detail}")]
    UnsupportedTerm {
        /// Format name.
        format: &'static str,
        /// Description of the offending term.
        detail: String,
    },

    /// The file extension does not identify a supported format.
    #[error("cannot infer graph format of {0}")]
    UnknownFormat(PathBuf),

    /// The document could not be read.
    #[error("cannot read graph document {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// An output format could not be produced. Fatal for that format only.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// The requested format name is not supported.
    #[error("unsupported output format `{0}` (expected turtle, jsonld or ntriples)")]
    UnsupportedFormat(String),

    /// JSON encoding failed.
    #[error("JSON-LD encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The file could not be written or moved into place.
    #[error("cannot write {path}: {source}")]
    Io {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// The merge of a new fragment into a prior graph did not complete.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// Copying the prior graph failed; nothing was written.
    #[error("cannot copy prior graph {from} to {to}: {source}")]
    Copy {
        /// Prior graph path.
        from: PathBuf,
        /// Copy destination.
        to: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The copy destination is the prior graph itself.
    #[error("output path {0} is the prior graph itself; refusing to modify an input")]
    OutputAliasesInput(PathBuf),

    /// The prior graph could not be parsed. The verbatim copy is kept.
    #[error("prior graph could not be parsed (unmodified copy kept at {copy}): {source}")]
    ExistingGraphParse {
        /// Location of the preserved copy.
        copy: PathBuf,
        /// Parse failure.
        source: GraphParseError,
    },

    /// The prior graph's extension does not name a supported format, so it
    /// has no canonical output location. Nothing was copied.
    #[error("cannot infer the format of prior graph {0}")]
    UnrecognizedFormat(PathBuf),

    /// `convert` mode was requested without a prior graph.
    #[error("convert mode needs a prior graph, but none was found")]
    NothingToConvert,
}

impl MergeError {
    /// Returns true when a usable prior artifact was left in place.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MergeError::ExistingGraphParse { .. })
    }
}

/// A subject or session label failed validation.
#[derive(Debug, thiserror::Error)]
pub enum LabelError {
    /// Empty after stripping the BIDS prefix.
    #[error("{kind} label is empty")]
    Empty {
        /// `subject` or `session`.
        kind: &'static str,
    },

    /// Contains characters other than ASCII letters and digits.
    #[error("invalid {kind} label `{label}`: only alphanumeric characters are allowed")]
    Invalid {
        /// `subject` or `session`.
        kind: &'static str,
        /// The offending label.
        label: String,
    },
}

/// The converter configuration file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ConverterConfig`](crate::config::ConverterConfig).
    #[error("cannot parse config file {path}: {source}")]
    Toml {
        /// Config path.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}

/// Per-subject conversion failure.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// A metrics document could not be flattened.
    #[error("sub-{subject}{session}: {source}")]
    Metrics {
        /// Subject label.
        subject: String,
        /// `_ses-<label>` or empty.
        session: String,
        /// Underlying error.
        source: MalformedMetricsError,
    },

    /// A metrics file could not be read.
    #[error("cannot read metrics file {path}: {source}")]
    ReadMetrics {
        /// Metrics path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Merging into the prior graph failed.
    #[error("sub-{subject}{session}: {source}")]
    Merge {
        /// Subject label.
        subject: String,
        /// `_ses-<label>` or empty.
        session: String,
        /// Underlying error.
        source: MergeError,
    },

    /// No requested output format could be written.
    #[error("sub-{subject}{session}: no output format could be written")]
    NoOutput {
        /// Subject label.
        subject: String,
        /// `_ses-<label>` or empty.
        session: String,
    },

    /// The job has neither metrics nor a prior graph to work on.
    #[error("sub-{subject}{session}: no metrics to convert")]
    NoMetrics {
        /// Subject label.
        subject: String,
        /// `_ses-<label>` or empty.
        session: String,
    },

    /// An output directory or summary file could not be written.
    #[error(transparent)]
    Output(#[from] SerializationError),
}
