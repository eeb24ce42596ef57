//! MRIQC quality-control metrics as NIDM provenance graphs.
//!
//! The `mriqc-nidm` crate turns the per-scan JSON documents MRIQC writes into
//! NIDM statements (subject or session, QC activity, software agent, one
//! statement per metric), merges them into an existing graph without ever
//! touching the original file, and serializes the result as Turtle, JSON-LD
//! and N-Triples.
//!
//! # Entry Point
//!
//! ```
//! use mriqc_nidm::{flatten, map_to_graph, DictionaryIndex, MappingContext, Mode, Namespaces, SoftwareAgent, SystemClock};
//!
//! let ns = Namespaces::standard();
//! let dictionary = DictionaryIndex::packaged(&ns)?;
//! let doc = serde_json::json!({"snr": {"csf": 12.5}, "fd_mean": 0.3});
//! let record = flatten(&doc, "001", None)?;
//! let context = MappingContext::new(Mode::Generate, SoftwareAgent::default());
//! let fragment = map_to_graph(&record, &dictionary, &context, &SystemClock);
//! assert_eq!(fragment.metric_statements(), 2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Serialization
//!
//! ```
//! # use mriqc_nidm::{Graph, Namespaces};
//! use mriqc_nidm::serializer::{serialize, GraphFormat};
//!
//! let turtle = serialize(&Graph::new(), GraphFormat::Turtle, &Namespaces::standard())?;
//! assert!(String::from_utf8(turtle)?.starts_with("@prefix"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Whole subjects, including prior-graph discovery and output layout, go
//! through [`pipeline::Converter`].

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

pub mod config;
pub mod dictionary;
pub mod error;
pub mod flatten;
pub mod layout;
pub mod mapper;
pub mod merge;
pub mod model;
pub mod namespaces;
pub mod parser;
pub mod pipeline;
pub mod serializer;

pub use config::ConverterConfig;
pub use dictionary::{DictionaryEntry, DictionaryIndex};
pub use error::{
    ConfigError, ConversionError, DictionaryLoadError, GraphParseError, LabelError,
    MalformedMetricsError, MergeError, SerializationError,
};
pub use flatten::{flatten, strip_metadata, MetricRecord, MetricValue};
pub use layout::{OutputLayout, SessionLabel, SubjectLabel};
pub use mapper::{
    map_to_graph, Clock, FixedClock, GraphFragment, MappingContext, SoftwareAgent, SystemClock,
};
pub use merge::{augment, MergeOutcome, MergeState, Mode};
pub use model::{Graph, Literal, Term, Triple};
pub use namespaces::Namespaces;
pub use pipeline::{ConversionSummary, Converter, ScanInput, SubjectJob};
pub use serializer::GraphFormat;
