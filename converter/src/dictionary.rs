//! Data dictionary: metric key → controlled-vocabulary term.
//!
//! The dictionary is a CSV table with a header row. It is read once per
//! invocation into a [`DictionaryIndex`], which has no mutating methods and is
//! shared by reference for the rest of the run.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::DictionaryLoadError;
use crate::namespaces::{Namespaces, Resolved};

/// The dictionary table shipped with the crate.
const PACKAGED_DICTIONARY: &str = include_str!("../data/mriqc_dictionary_v1.csv");

/// Accepted header spellings per column (compared case-insensitively).
const KEY_COLUMNS: &[&str] = &["metrickey", "source_variable", "column", "variable"];
const TERM_COLUMNS: &[&str] = &["semanticterm", "sameas", "isabout", "term"];
const DESCRIPTION_COLUMNS: &[&str] = &["description", "label"];
const UNIT_COLUMNS: &[&str] = &["unit", "units"];

/// One controlled-vocabulary mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    /// Flattened metric key, matched exactly.
    pub metric_key: String,
    /// Resolved predicate IRI.
    pub semantic_term: String,
    /// Human-readable description (may be empty).
    pub description: String,
    /// Unit of measurement, if any.
    pub unit: Option<String>,
}

/// Read-only lookup structure built from a dictionary table.
#[derive(Debug, Clone, Default)]
pub struct DictionaryIndex {
    entries: HashMap<String, DictionaryEntry>,
}

impl DictionaryIndex {
    /// Loads a dictionary CSV from disk.
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryLoadError`] if the file cannot be read, is not
    /// valid CSV, or lacks the `metricKey` / `semanticTerm` columns.
    pub fn load(path: &Path, namespaces: &Namespaces) -> Result<Self, DictionaryLoadError> {
        let bytes = std::fs::read(path).map_err(|source| DictionaryLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(bytes.as_slice(), &path.display().to_string(), namespaces)
    }

    /// Parses the dictionary table compiled into the crate.
    ///
    /// # Errors
    ///
    /// Returns [`DictionaryLoadError`] only if the packaged table is corrupt.
    pub fn packaged(namespaces: &Namespaces) -> Result<Self, DictionaryLoadError> {
        Self::from_reader(PACKAGED_DICTIONARY.as_bytes(), "<packaged>", namespaces)
    }

    /// Parses a dictionary table from any reader; `origin` names it in errors.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn from_reader<R: std::io::Read>(
        reader: R,
        origin: &str,
        namespaces: &Namespaces,
    ) -> Result<Self, DictionaryLoadError> {
        let csv_err = |source| DictionaryLoadError::Csv {
            origin: origin.to_owned(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers = reader.headers().map_err(csv_err)?.clone();

        let find = |aliases: &[&str]| {
            headers
                .iter()
                .position(|h| aliases.contains(&h.to_ascii_lowercase().as_str()))
        };
        let missing = |column| DictionaryLoadError::MissingColumn {
            origin: origin.to_owned(),
            column,
        };
        let key_idx = find(KEY_COLUMNS).ok_or_else(|| missing("metricKey"))?;
        let term_idx = find(TERM_COLUMNS).ok_or_else(|| missing("semanticTerm"))?;
        let description_idx = find(DESCRIPTION_COLUMNS);
        let unit_idx = find(UNIT_COLUMNS);

        let mut entries = HashMap::new();
        let mut term_owners: HashMap<String, String> = HashMap::new();
        for (row, record) in reader.records().enumerate() {
            let record = record.map_err(csv_err)?;
            // Header is line 1.
            let line = row + 2;
            let field = |idx: Option<usize>| {
                idx.and_then(|i| record.get(i))
                    .map(str::to_owned)
                    .filter(|s| !s.is_empty())
            };

            let Some(metric_key) = field(Some(key_idx)) else {
                warn!(origin, line, "skipping dictionary row without a metric key");
                continue;
            };
            let Some(raw_term) = field(Some(term_idx)) else {
                warn!(origin, line, key = %metric_key, "skipping dictionary row without a semantic term");
                continue;
            };
            let semantic_term = match namespaces.resolve(&raw_term) {
                Resolved::Expanded(iri) => iri,
                Resolved::Verbatim(iri) => {
                    if !iri.contains("://") && !iri.starts_with("urn:") {
                        warn!(origin, line, term = %iri, "unregistered prefix; keeping term verbatim");
                    }
                    iri
                }
                Resolved::Invalid => {
                    warn!(origin, line, term = %raw_term, "semantic term is not an IRI; skipping row");
                    continue;
                }
            };
            if entries.contains_key(&metric_key) {
                warn!(origin, line, key = %metric_key, "duplicate dictionary key; keeping the first definition");
                continue;
            }
            // One predicate per key, or two metrics could collapse into one statement.
            if let Some(owner) = term_owners.get(&semantic_term) {
                warn!(
                    origin,
                    line,
                    key = %metric_key,
                    term = %semantic_term,
                    owner = %owner,
                    "semantic term already mapped by another key; this key uses the fallback namespace"
                );
                continue;
            }
            term_owners.insert(semantic_term.clone(), metric_key.clone());
            entries.insert(
                metric_key.clone(),
                DictionaryEntry {
                    metric_key,
                    semantic_term,
                    description: field(description_idx).unwrap_or_default(),
                    unit: field(unit_idx),
                },
            );
        }

        debug!(origin, terms = entries.len(), "loaded data dictionary");
        Ok(Self { entries })
    }

    /// Looks up a flattened metric key.
    #[must_use]
    pub fn lookup(&self, metric_key: &str) -> Option<&DictionaryEntry> {
        self.entries.get(metric_key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dictionary has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::iris;

    fn parse(table: &str) -> Result<DictionaryIndex, DictionaryLoadError> {
        DictionaryIndex::from_reader(table.as_bytes(), "test", &Namespaces::standard())
    }

    #[test]
    fn packaged_dictionary_loads() {
        let dict = DictionaryIndex::packaged(&Namespaces::standard()).unwrap();
        let fd = dict.lookup("fd_mean").unwrap();
        assert_eq!(
            fd.semantic_term,
            format!("{}meanFramewiseDisplacement", iris::MRIQC)
        );
        assert_eq!(fd.unit.as_deref(), Some("mm"));
        assert!(dict.len() > 40);
    }

    #[test]
    fn accepts_pynidm_style_headers() {
        let dict = parse("source_variable,sameAs,label\nsnr,http://x.org/snr,SNR\n").unwrap();
        let e = dict.lookup("snr").unwrap();
        assert_eq!(e.semantic_term, "http://x.org/snr");
        assert_eq!(e.description, "SNR");
        assert_eq!(e.unit, None);
    }

    #[test]
    fn missing_term_column_is_an_error() {
        let err = parse("metricKey,description\nsnr,SNR\n").unwrap_err();
        assert!(matches!(
            err,
            DictionaryLoadError::MissingColumn {
                column: "semanticTerm",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = DictionaryIndex::load(
            Path::new("/nonexistent/dictionary.csv"),
            &Namespaces::standard(),
        )
        .unwrap_err();
        assert!(matches!(err, DictionaryLoadError::Io { .. }));
    }

    #[test]
    fn unusable_rows_are_skipped() {
        let dict = parse(
            "metricKey,semanticTerm\n,nidm:x\nempty,\nbare,notAnIri\nok,nidm:ok\nok,nidm:other\n",
        )
        .unwrap();
        assert_eq!(dict.len(), 1);
        assert_eq!(
            dict.lookup("ok").unwrap().semantic_term,
            format!("{}ok", iris::NIDM)
        );
    }

    #[test]
    fn shared_semantic_term_keeps_the_first_key() {
        let dict = parse("metricKey,semanticTerm\na,nidm:x\nb,nidm:x\nc,nidm:y\n").unwrap();
        assert_eq!(dict.len(), 2);
        assert!(dict.lookup("a").is_some());
        assert!(dict.lookup("b").is_none());
        assert!(dict.lookup("c").is_some());
    }

    #[test]
    fn unknown_prefix_is_kept_verbatim() {
        let dict = parse("metricKey,semanticTerm\nfd_mean,qc:meanFramewiseDisplacement\n").unwrap();
        assert_eq!(
            dict.lookup("fd_mean").unwrap().semantic_term,
            "qc:meanFramewiseDisplacement"
        );
    }
}
