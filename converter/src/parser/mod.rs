//! Parsers for previously written (or third-party) provenance graphs.
//!
//! Turtle and N-Triples go through `sophia_turtle`, JSON-LD through
//! `sophia_jsonld`. Blank node labels are those the parser assigns.

mod rdf;

use std::path::Path;

use crate::error::GraphParseError;
use crate::model::Graph;
use crate::serializer::GraphFormat;

/// Parses a graph document.
///
/// # Errors
///
/// Returns [`GraphParseError::Syntax`] if the document is not UTF-8 or not
/// valid in `format`, and [`GraphParseError::UnsupportedTerm`] for statements
/// a provenance graph cannot hold.
pub fn parse(bytes: &[u8], format: GraphFormat) -> Result<Graph, GraphParseError> {
    let text = std::str::from_utf8(bytes).map_err(|e| GraphParseError::Syntax {
        format: format.name(),
        message: e.to_string(),
    })?;
    rdf::parse_text(text, format)
}

/// Reads and parses a graph document, detecting its format from the file
/// extension.
///
/// # Errors
///
/// Returns [`GraphParseError::UnknownFormat`] for an unrecognised extension,
/// [`GraphParseError::Io`] if the file cannot be read, or any error of
/// [`parse`].
pub fn parse_file(path: &Path) -> Result<(Graph, GraphFormat), GraphParseError> {
    let format =
        GraphFormat::from_path(path).ok_or_else(|| GraphParseError::UnknownFormat(path.to_path_buf()))?;
    let bytes = std::fs::read(path).map_err(|source| GraphParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let graph = parse(&bytes, format)?;
    tracing::debug!(path = %path.display(), %format, statements = graph.len(), "parsed graph document");
    Ok((graph, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{iris, Literal, Term, Triple};
    use crate::namespaces::Namespaces;
    use crate::serializer::serialize;

    fn sample() -> Graph {
        let act = Term::iri(format!("{}qc_sub-01_ses-1_T1w_20240101T000000Z", iris::NIIRI));
        [
            Triple::new(act.clone(), iris::RDF_TYPE, Term::iri(iris::PROV_ACTIVITY)),
            Triple::new(act.clone(), iris::RDFS_LABEL, Literal::string("T1w")),
            Triple::new(act.clone(), iris::RDFS_COMMENT, Literal::string("tab\there \"quoted\"\nnext")),
            Triple::new(act.clone(), iris::RDFS_COMMENT, Literal::lang_string("bonjour", "fr")),
            Triple::new(act.clone(), format!("{}snr.csf", iris::QC_RAW), Literal::double(12.5)),
            Triple::new(act.clone(), format!("{}a%20b", iris::QC_RAW), Literal::string("n/a")),
            Triple::new(act.clone(), format!("{}n", iris::QC_RAW), Literal::integer(-3)),
            Triple::new(act.clone(), format!("{}ok", iris::QC_RAW), Literal::boolean(true)),
            Triple::new(act, iris::PROV_USED, Term::iri("urn:uuid:1234")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn every_format_round_trips() {
        let ns = Namespaces::standard();
        let g = sample();
        for format in GraphFormat::ALL {
            let bytes = serialize(&g, format, &ns).unwrap();
            let back = parse(&bytes, format).unwrap();
            assert_eq!(back, g, "{format} round trip changed the statement set");
        }
    }

    #[test]
    fn syntax_errors_are_reported() {
        let err = parse(b"<urn:a> <urn:p> .", GraphFormat::NTriples).unwrap_err();
        assert!(matches!(err, GraphParseError::Syntax { format: "ntriples", .. }));
        let err = parse(b"@prefix x <bad", GraphFormat::Turtle).unwrap_err();
        assert!(matches!(err, GraphParseError::Syntax { format: "turtle", .. }));
        let err = parse(b"{\"@id\": ", GraphFormat::JsonLd).unwrap_err();
        assert!(matches!(err, GraphParseError::Syntax { format: "jsonld", .. }));
    }

    #[test]
    fn json_ld_default_language_applies() {
        let doc = br#"{
            "@context": {"@language": "en", "ex": "http://example.org/"},
            "@id": "ex:a",
            "ex:p": "hi"
        }"#;
        let g = parse(doc, GraphFormat::JsonLd).unwrap();
        let expected: Graph = [Triple::new(
            Term::iri("http://example.org/a"),
            "http://example.org/p",
            Literal::lang_string("hi", "en"),
        )]
        .into_iter()
        .collect();
        assert_eq!(g, expected);
    }

    #[test]
    fn json_ld_blank_nodes_stay_distinct() {
        let doc = br#"{"@graph": [
            {"@id": "_:genid0", "http://example.org/p": "x"},
            {"http://example.org/q": "y"}
        ]}"#;
        let g = parse(doc, GraphFormat::JsonLd).unwrap();
        assert_eq!(g.len(), 2);
        let subjects: std::collections::BTreeSet<_> = g.iter().map(|t| &t.subject).collect();
        assert_eq!(subjects.len(), 2);
        assert!(subjects.iter().all(|s| matches!(s, Term::Blank(_))));
    }

    #[test]
    fn json_ld_relative_ids_resolve_against_base() {
        let doc = br#"{
            "@context": {"@base": "http://example.org/"},
            "@id": "a",
            "http://example.org/p": "x"
        }"#;
        let g = parse(doc, GraphFormat::JsonLd).unwrap();
        let subjects: Vec<_> = g.iter().map(|t| t.subject.clone()).collect();
        assert_eq!(subjects, vec![Term::iri("http://example.org/a")]);
    }

    #[test]
    fn json_ld_prior_with_language_survives_update_parse() {
        let ns = Namespaces::standard();
        let g: Graph = [Triple::new(
            Term::iri(format!("{}sub-01", iris::NIIRI)),
            iris::RDFS_LABEL,
            Literal::lang_string("sujet", "fr"),
        )]
        .into_iter()
        .collect();
        let bytes = serialize(&g, GraphFormat::JsonLd, &ns).unwrap();
        assert_eq!(parse(&bytes, GraphFormat::JsonLd).unwrap(), g);
    }

    #[test]
    fn parse_file_detects_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nidm.ttl");
        std::fs::write(&path, "<urn:a> <urn:p> \"x\" .\n").unwrap();
        let (g, format) = parse_file(&path).unwrap();
        assert_eq!(format, GraphFormat::Turtle);
        assert_eq!(g.len(), 1);

        let unknown = dir.path().join("nidm.rdf");
        std::fs::write(&unknown, "").unwrap();
        assert!(matches!(parse_file(&unknown), Err(GraphParseError::UnknownFormat(_))));
    }
}
