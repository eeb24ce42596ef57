//! Prefix registry shared by the dictionary loader, serializers and parsers.
//!
//! Prefixes are kept in a sorted map so that the `@prefix` block of a Turtle
//! document and the `@context` of a JSON-LD document come out in the same
//! order on every run.

use std::collections::BTreeMap;

use crate::model::iris;

/// Outcome of resolving a dictionary term or compact IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// `prefix:local` with a registered prefix, expanded to a full IRI.
    Expanded(String),
    /// Already an absolute IRI, or a `scheme:rest` string whose scheme is not
    /// a registered prefix. Kept verbatim.
    Verbatim(String),
    /// Not an IRI at all (no scheme).
    Invalid,
}

/// Mapping from prefix to namespace IRI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    by_prefix: BTreeMap<String, String>,
}

impl Namespaces {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            by_prefix: BTreeMap::new(),
        }
    }

    /// The prefixes every NIDM document produced by this crate declares.
    #[must_use]
    pub fn standard() -> Self {
        let mut ns = Self::empty();
        for (prefix, iri) in [
            ("rdf", iris::RDF),
            ("rdfs", iris::RDFS),
            ("xsd", iris::XSD),
            ("prov", iris::PROV),
            ("nidm", iris::NIDM),
            ("niiri", iris::NIIRI),
            ("ndar", iris::NDAR),
            ("dct", iris::DCT),
            ("sdo", iris::SDO),
            ("mriqc", iris::MRIQC),
            ("qcraw", iris::QC_RAW),
        ] {
            ns.insert(prefix, iri);
        }
        ns
    }

    /// Registers (or overrides) a prefix.
    pub fn insert(&mut self, prefix: impl Into<String>, iri: impl Into<String>) {
        self.by_prefix.insert(prefix.into(), iri.into());
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.insert(prefix, iri);
        self
    }

    /// Namespace IRI bound to `prefix`.
    #[must_use]
    pub fn get(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }

    /// Iterates `(prefix, namespace)` pairs in prefix order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_prefix
            .iter()
            .map(|(p, iri)| (p.as_str(), iri.as_str()))
    }

    /// Resolves a term that may be a compact IRI (`nidm:Session`) or an
    /// absolute IRI.
    #[must_use]
    pub fn resolve(&self, term: &str) -> Resolved {
        let term = term.trim();
        let Some((prefix, local)) = term.split_once(':') else {
            return Resolved::Invalid;
        };
        if !local.starts_with("//") {
            if let Some(ns) = self.get(prefix) {
                return Resolved::Expanded(format!("{ns}{local}"));
            }
        }
        if has_scheme(prefix) {
            Resolved::Verbatim(term.to_owned())
        } else {
            Resolved::Invalid
        }
    }

    /// Shortens `iri` to `prefix:local` using the longest matching namespace,
    /// provided the local part is safe to write unescaped in Turtle and as a
    /// JSON-LD compact IRI.
    #[must_use]
    pub fn compact(&self, iri: &str) -> Option<String> {
        self.by_prefix
            .iter()
            .filter_map(|(prefix, ns)| iri.strip_prefix(ns.as_str()).map(|local| (prefix, ns, local)))
            .filter(|(_, _, local)| is_safe_local(local))
            .max_by_key(|(_, ns, _)| ns.len())
            .map(|(prefix, _, local)| format!("{prefix}:{local}"))
    }
}

impl Default for Namespaces {
    fn default() -> Self {
        Self::standard()
    }
}

/// RFC 3986 scheme: ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ).
fn has_scheme(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Conservative subset of Turtle `PN_LOCAL`: ASCII letters, digits, `_`, `-`
/// and interior `.`; must not start with `-` or `.`, nor end with `.`.
pub(crate) fn is_safe_local(local: &str) -> bool {
    let Some(first) = local.chars().next() else {
        return false;
    };
    if !(first.is_ascii_alphanumeric() || first == '_') || local.ends_with('.') {
        return false;
    }
    local
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Percent-encodes everything outside the RFC 3986 unreserved set, so a raw
/// metric key can become the local part of an IRI.
#[must_use]
pub fn encode_local(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}
