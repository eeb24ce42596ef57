//! TOML configuration for the converter.
//!
//! ```toml
//! dictionary = "mriqc_dictionary.csv"
//! formats = ["turtle", "jsonld", "ntriples"]
//! describe_terms = true
//! software_version = "24.0.0"
//!
//! [prefixes]
//! lab = "https://example.org/lab#"
//! ```
//!
//! Every key is optional. Command-line flags override what is set here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::flatten::DEFAULT_EXCLUDED_KEYS;
use crate::model::iris;
use crate::namespaces::Namespaces;
use crate::serializer::GraphFormat;

/// Converter settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConverterConfig {
    /// Dictionary CSV; the packaged table is used when unset.
    pub dictionary: Option<PathBuf>,
    /// Output formats written for every subject.
    pub formats: Vec<GraphFormat>,
    /// Namespace for metric keys missing from the dictionary.
    pub fallback_namespace: String,
    /// Describe dictionary predicates with `rdfs:comment` and units.
    pub describe_terms: bool,
    /// Overrides the software name read from the metrics' provenance block.
    pub software_name: Option<String>,
    /// Overrides the software version read from the metrics' provenance block.
    pub software_version: Option<String>,
    /// Top-level keys removed before flattening.
    pub exclude_keys: Vec<String>,
    /// Extra prefixes for the output registry.
    pub prefixes: BTreeMap<String, String>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            dictionary: None,
            formats: vec![GraphFormat::Turtle, GraphFormat::JsonLd],
            fallback_namespace: iris::QC_RAW.to_owned(),
            describe_terms: false,
            software_name: None,
            software_version: None,
            exclude_keys: DEFAULT_EXCLUDED_KEYS.iter().map(|k| (*k).to_owned()).collect(),
            prefixes: BTreeMap::new(),
        }
    }
}

impl ConverterConfig {
    /// Reads a TOML config file.
    ///
    /// A relative `dictionary` path is resolved against the config file's
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Toml`] if it is not a valid configuration (unknown keys
    /// and unsupported format names included).
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        if let (Some(dictionary), Some(base)) = (&config.dictionary, path.parent()) {
            if dictionary.is_relative() {
                config.dictionary = Some(base.join(dictionary));
            }
        }
        tracing::debug!(path = %path.display(), ?config, "loaded configuration");
        Ok(config)
    }

    /// The standard prefix registry extended with the configured prefixes and
    /// the fallback namespace (as `qc`, when it is not already registered).
    #[must_use]
    pub fn namespaces(&self) -> Namespaces {
        let mut ns = Namespaces::standard();
        for (prefix, iri) in &self.prefixes {
            ns.insert(prefix.clone(), iri.clone());
        }
        if ns.compact(&format!("{}x", self.fallback_namespace)).is_none() {
            ns.insert("qc", self.fallback_namespace.clone());
        }
        ns
    }
}
