//! Serializers for provenance graphs.
//!
//! Three serialization formats are supported:
//! - **Turtle** ([`turtle`]): the default, written as `sub-<id>.ttl`
//! - **JSON-LD** ([`jsonld`]): compact document, written as `sub-<id>.jsonld`
//! - **N-Triples** ([`ntriples`]): one statement per line, written as `sub-<id>.nt`
//!
//! Output is a pure function of the graph and the prefix registry, so the same
//! graph always serializes to the same bytes.

pub mod jsonld;
pub mod ntriples;
pub mod turtle;

use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use crate::error::SerializationError;
use crate::model::Graph;
use crate::namespaces::Namespaces;

/// A supported graph serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphFormat {
    /// Turtle 1.1.
    Turtle,
    /// JSON-LD 1.1, compact form.
    JsonLd,
    /// N-Triples.
    NTriples,
}

impl GraphFormat {
    /// All formats, in default output order.
    pub const ALL: [GraphFormat; 3] = [GraphFormat::Turtle, GraphFormat::JsonLd, GraphFormat::NTriples];

    /// File extension written for this format (without the dot).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            GraphFormat::Turtle => "ttl",
            GraphFormat::JsonLd => "jsonld",
            GraphFormat::NTriples => "nt",
        }
    }

    /// Canonical name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            GraphFormat::Turtle => "turtle",
            GraphFormat::JsonLd => "jsonld",
            GraphFormat::NTriples => "ntriples",
        }
    }

    /// Detects the format of a graph document from its file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "ttl" => Some(GraphFormat::Turtle),
            "nt" => Some(GraphFormat::NTriples),
            "jsonld" | "json-ld" | "json" => Some(GraphFormat::JsonLd),
            _ => None,
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GraphFormat {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "turtle" | "ttl" => Ok(GraphFormat::Turtle),
            "jsonld" | "json-ld" => Ok(GraphFormat::JsonLd),
            "ntriples" | "n-triples" | "nt" => Ok(GraphFormat::NTriples),
            _ => Err(SerializationError::UnsupportedFormat(s.to_owned())),
        }
    }
}

impl serde::Serialize for GraphFormat {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for GraphFormat {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Serializes `graph` in one format.
///
/// # Errors
///
/// Returns [`SerializationError::Json`] if JSON-LD encoding fails.
pub fn serialize(
    graph: &Graph,
    format: GraphFormat,
    namespaces: &Namespaces,
) -> Result<Vec<u8>, SerializationError> {
    match format {
        GraphFormat::Turtle => Ok(turtle::to_turtle(graph, namespaces).into_bytes()),
        GraphFormat::NTriples => Ok(ntriples::to_ntriples(graph).into_bytes()),
        GraphFormat::JsonLd => {
            let mut bytes = serde_json::to_vec_pretty(&jsonld::to_json_ld(graph, namespaces))?;
            bytes.push(b'\n');
            Ok(bytes)
        }
    }
}

/// Serializes `graph` in every requested format. A format that fails does not
/// prevent the others.
pub fn serialize_all(
    graph: &Graph,
    formats: &[GraphFormat],
    namespaces: &Namespaces,
) -> Vec<(GraphFormat, Result<Vec<u8>, SerializationError>)> {
    formats
        .iter()
        .map(|&format| (format, serialize(graph, format, namespaces)))
        .collect()
}

/// Writes `bytes` to `path` through a temporary file in the same directory,
/// so readers never observe a partially written document.
///
/// # Errors
///
/// Returns [`SerializationError::Io`] if the directory cannot be created or
/// the file cannot be written, synced or renamed into place.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SerializationError> {
    let io_err = |source| SerializationError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(bytes).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

/// Escapes a literal's lexical form for Turtle and N-Triples string syntax.
pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04X}", u32::from(c))),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_parse() {
        assert_eq!("ttl".parse::<GraphFormat>().unwrap(), GraphFormat::Turtle);
        assert_eq!("JSON-LD".parse::<GraphFormat>().unwrap(), GraphFormat::JsonLd);
        assert_eq!("nt".parse::<GraphFormat>().unwrap(), GraphFormat::NTriples);
        assert!(matches!(
            "rdfxml".parse::<GraphFormat>(),
            Err(SerializationError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(GraphFormat::from_path(Path::new("a/nidm.TTL")), Some(GraphFormat::Turtle));
        assert_eq!(GraphFormat::from_path(Path::new("x.json-ld")), Some(GraphFormat::JsonLd));
        assert_eq!(GraphFormat::from_path(Path::new("x.rdf")), None);
    }

    #[test]
    fn escapes_control_characters() {
        assert_eq!(escape_string("a\"b\\c\nd\u{1}"), "a\\\"b\\\\c\\nd\\u0001");
    }

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.ttl");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }
}
