//! Core graph model types.
//!
//! A provenance graph is an ordered set of [`Triple`]s. Ordering is total and
//! derived from the term contents, so iteration (and therefore every
//! serialization) is deterministic, and inserting a triple that is exactly
//! equal to an existing one is a no-op.

use std::collections::BTreeSet;
use std::fmt;

use iris::{RDF_TYPE, XSD_BOOLEAN, XSD_DOUBLE, XSD_INTEGER, XSD_STRING};

/// An RDF literal: lexical form, datatype IRI, optional language tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal {
    /// The lexical form, exactly as written in the document.
    pub lexical: String,
    /// Full datatype IRI (`xsd:string` for simple literals,
    /// `rdf:langString` for language-tagged ones).
    pub datatype: String,
    /// Language tag, present only for `rdf:langString` literals.
    pub language: Option<String>,
}

impl Literal {
    /// A simple `xsd:string` literal.
    pub fn string(value: impl Into<String>) -> Self {
        Self::typed(value, XSD_STRING)
    }

    /// A literal with an explicit datatype IRI.
    pub fn typed(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Self {
            lexical: lexical.into(),
            datatype: datatype.into(),
            language: None,
        }
    }

    /// A language-tagged string.
    pub fn lang_string(value: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            lexical: value.into(),
            datatype: iris::RDF_LANG_STRING.to_owned(),
            language: Some(language.into()),
        }
    }

    /// An `xsd:integer` literal.
    #[must_use]
    pub fn integer(value: i64) -> Self {
        Self::typed(value.to_string(), XSD_INTEGER)
    }

    /// An `xsd:boolean` literal.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::typed(value.to_string(), XSD_BOOLEAN)
    }

    /// An `xsd:double` literal. Callers only pass finite values.
    #[must_use]
    pub fn double(value: f64) -> Self {
        Self::typed(value.to_string(), XSD_DOUBLE)
    }

    /// Returns true for plain `xsd:string` literals without a language tag.
    #[must_use]
    pub fn is_plain_string(&self) -> bool {
        self.language.is_none() && self.datatype == XSD_STRING
    }
}

/// A node or value in a statement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Term {
    /// An absolute IRI.
    Iri(String),
    /// A blank node, identified by its document-local label (without `_:`).
    Blank(String),
    /// A literal value.
    Literal(Literal),
}

impl Term {
    /// Builds an IRI term.
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    /// Builds a blank-node term.
    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    /// Returns the IRI if this term is one.
    #[must_use]
    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    /// Returns the literal if this term is one.
    #[must_use]
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Term::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

impl From<Literal> for Term {
    fn from(lit: Literal) -> Self {
        Term::Literal(lit)
    }
}

impl fmt::Display for Term {
    /// N-Triples-like rendering, used in log messages and test failures.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Blank(label) => write!(f, "_:{label}"),
            Term::Literal(lit) => match &lit.language {
                Some(lang) => write!(f, "{:?}@{lang}", lit.lexical),
                None if lit.datatype == XSD_STRING => write!(f, "{:?}", lit.lexical),
                None => write!(f, "{:?}^^<{}>", lit.lexical, lit.datatype),
            },
        }
    }
}

/// A single subject-predicate-object statement.
///
/// Field order matters: the derived ordering groups statements by subject,
/// then predicate, which the serializers rely on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    /// IRI or blank node.
    pub subject: Term,
    /// Full predicate IRI.
    pub predicate: String,
    /// IRI, blank node or literal.
    pub object: Term,
}

impl Triple {
    /// Builds a triple.
    pub fn new(subject: Term, predicate: impl Into<String>, object: impl Into<Term>) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object: object.into(),
        }
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// An ordered set of statements with exact-equality deduplication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    triples: BTreeSet<Triple>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a statement. Returns false if an identical statement was
    /// already present.
    pub fn insert(&mut self, triple: Triple) -> bool {
        self.triples.insert(triple)
    }

    /// Shorthand for inserting `(subject, predicate, object)`.
    pub fn add(&mut self, subject: &Term, predicate: &str, object: impl Into<Term>) -> bool {
        self.insert(Triple::new(subject.clone(), predicate, object))
    }

    /// Adds every statement of `other`, returning how many were new.
    pub fn union_with(&mut self, other: &Graph) -> usize {
        other
            .triples
            .iter()
            .filter(|t| self.triples.insert((*t).clone()))
            .count()
    }

    /// Removes every statement about or pointing at any of `nodes`,
    /// returning how many were removed.
    pub fn remove_nodes(&mut self, nodes: &BTreeSet<Term>) -> usize {
        let before = self.triples.len();
        self.triples
            .retain(|t| !nodes.contains(&t.subject) && !nodes.contains(&t.object));
        before - self.triples.len()
    }

    /// Returns true if the exact statement is present.
    #[must_use]
    pub fn contains(&self, triple: &Triple) -> bool {
        self.triples.contains(triple)
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    /// Returns true if the graph has no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Iterates statements in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = &Triple> {
        self.triples.iter()
    }

    /// Objects of all `(subject, predicate, _)` statements.
    pub fn objects<'a>(
        &'a self,
        subject: &'a Term,
        predicate: &'a str,
    ) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| &t.subject == subject && t.predicate == predicate)
            .map(|t| &t.object)
    }

    /// Subjects declared with `rdf:type <class_iri>`.
    pub fn instances_of<'a>(&'a self, class_iri: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.triples
            .iter()
            .filter(move |t| t.predicate == RDF_TYPE && t.object.as_iri() == Some(class_iri))
            .map(|t| &t.subject)
    }

    /// Returns true if `self` contains every statement of `other`.
    #[must_use]
    pub fn is_superset(&self, other: &Graph) -> bool {
        self.triples.is_superset(&other.triples)
    }
}

impl FromIterator<Triple> for Graph {
    fn from_iter<I: IntoIterator<Item = Triple>>(iter: I) -> Self {
        Self {
            triples: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Graph {
    type Item = &'a Triple;
    type IntoIter = std::collections::btree_set::Iter<'a, Triple>;

    fn into_iter(self) -> Self::IntoIter {
        self.triples.iter()
    }
}

/// Standard IRI constants used by the mapper, serializers and merger.
pub mod iris {
    /// RDF namespace.
    pub const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
    /// RDFS namespace.
    pub const RDFS: &str = "http://www.w3.org/2000/01/rdf-schema#";
    /// XSD namespace.
    pub const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
    /// W3C PROV-O namespace.
    pub const PROV: &str = "http://www.w3.org/ns/prov#";
    /// NIDM experiment terms.
    pub const NIDM: &str = "http://purl.org/nidash/nidm#";
    /// NIDM instance IRIs.
    pub const NIIRI: &str = "http://iri.nidash.org/";
    /// NDA data dictionary elements.
    pub const NDAR: &str = "https://ndar.nih.gov/api/datadictionary/v2/dataelement/";
    /// Dublin Core terms.
    pub const DCT: &str = "http://purl.org/dc/terms/";
    /// schema.org.
    pub const SDO: &str = "https://schema.org/";
    /// Controlled MRIQC image-quality-metric terms used by the packaged dictionary.
    pub const MRIQC: &str = "http://purl.org/nidash/mriqc#";
    /// Default namespace for metrics without a dictionary term.
    pub const QC_RAW: &str = "http://purl.org/nidash/mriqc/raw#";

    /// `rdf:type`.
    pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
    /// `rdf:langString`.
    pub const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";
    /// `rdfs:label`.
    pub const RDFS_LABEL: &str = "http://www.w3.org/2000/01/rdf-schema#label";
    /// `rdfs:comment`.
    pub const RDFS_COMMENT: &str = "http://www.w3.org/2000/01/rdf-schema#comment";

    // XSD datatypes
    /// `xsd:string`.
    pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    /// `xsd:integer`.
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    /// `xsd:double`.
    pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
    /// `xsd:boolean`.
    pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    /// `xsd:dateTime`.
    pub const XSD_DATETIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

    // PROV
    /// `prov:Activity`.
    pub const PROV_ACTIVITY: &str = "http://www.w3.org/ns/prov#Activity";
    /// `prov:Agent`.
    pub const PROV_AGENT: &str = "http://www.w3.org/ns/prov#Agent";
    /// `prov:Person`.
    pub const PROV_PERSON: &str = "http://www.w3.org/ns/prov#Person";
    /// `prov:SoftwareAgent`.
    pub const PROV_SOFTWARE_AGENT: &str = "http://www.w3.org/ns/prov#SoftwareAgent";
    /// `prov:startedAtTime`.
    pub const PROV_STARTED_AT_TIME: &str = "http://www.w3.org/ns/prov#startedAtTime";
    /// `prov:wasAssociatedWith`.
    pub const PROV_WAS_ASSOCIATED_WITH: &str = "http://www.w3.org/ns/prov#wasAssociatedWith";
    /// `prov:used`.
    pub const PROV_USED: &str = "http://www.w3.org/ns/prov#used";

    // NIDM / NDA / DCT / schema.org
    /// `nidm:Session`.
    pub const NIDM_SESSION: &str = "http://purl.org/nidash/nidm#Session";
    /// `nidm:sessionLabel`.
    pub const NIDM_SESSION_LABEL: &str = "http://purl.org/nidash/nidm#sessionLabel";
    /// `nidm:unitCode`.
    pub const NIDM_UNIT_CODE: &str = "http://purl.org/nidash/nidm#unitCode";
    /// `ndar:src_subject_id`.
    pub const NDAR_SRC_SUBJECT_ID: &str =
        "https://ndar.nih.gov/api/datadictionary/v2/dataelement/src_subject_id";
    /// `dct:isPartOf`.
    pub const DCT_IS_PART_OF: &str = "http://purl.org/dc/terms/isPartOf";
    /// `dct:source`.
    pub const DCT_SOURCE: &str = "http://purl.org/dc/terms/source";
    /// `sdo:softwareVersion`.
    pub const SDO_SOFTWARE_VERSION: &str = "https://schema.org/softwareVersion";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str, p: &str, o: &str) -> Triple {
        Triple::new(Term::iri(s), p, Literal::string(o))
    }

    #[test]
    fn exact_duplicates_are_suppressed() {
        let mut g = Graph::new();
        assert!(g.insert(t("urn:a", "urn:p", "x")));
        assert!(!g.insert(t("urn:a", "urn:p", "x")));
        assert!(g.insert(t("urn:a", "urn:p", "y")));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn datatype_distinguishes_literals() {
        let mut g = Graph::new();
        g.add(&Term::iri("urn:a"), "urn:p", Literal::string("1"));
        g.add(&Term::iri("urn:a"), "urn:p", Literal::integer(1));
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn union_counts_only_new_statements() {
        let mut a: Graph = [t("urn:a", "urn:p", "1"), t("urn:a", "urn:p", "2")]
            .into_iter()
            .collect();
        let b: Graph = [t("urn:a", "urn:p", "2"), t("urn:b", "urn:p", "3")]
            .into_iter()
            .collect();
        assert_eq!(a.union_with(&b), 1);
        assert_eq!(a.len(), 3);
        assert!(a.is_superset(&b));
    }

    #[test]
    fn remove_nodes_drops_incoming_links_too() {
        let mut g: Graph = [t("urn:a", "urn:p", "1"), t("urn:b", "urn:p", "2")]
            .into_iter()
            .collect();
        g.add(&Term::iri("urn:b"), "urn:link", Term::iri("urn:a"));
        let gone: BTreeSet<Term> = [Term::iri("urn:a")].into_iter().collect();
        assert_eq!(g.remove_nodes(&gone), 2);
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn display_renders_ntriples_like() {
        let triple = Triple::new(Term::iri("urn:a"), "urn:p", Literal::integer(3));
        assert_eq!(
            triple.to_string(),
            format!("<urn:a> <urn:p> \"3\"^^<{XSD_INTEGER}> .")
        );
    }
}
