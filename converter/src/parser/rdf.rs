//! Turtle and N-Triples via `sophia_turtle`, JSON-LD via `sophia_jsonld`.

use sophia_api::parser::QuadParser;
use sophia_api::source::{QuadSource, StreamError, TripleSource};
use sophia_api::term::Term as RdfTerm;
use sophia_api::triple::Triple as RdfTriple;
use sophia_jsonld::JsonLdParser;
use sophia_turtle::parser::{nt, turtle};

use crate::error::GraphParseError;
use crate::model::iris::XSD_STRING;
use crate::model::{Graph, Literal, Term, Triple};
use crate::serializer::GraphFormat;

pub(super) fn parse_text(text: &str, format: GraphFormat) -> Result<Graph, GraphParseError> {
    match format {
        GraphFormat::NTriples => collect(nt::parse_str(text), format.name()),
        GraphFormat::Turtle => collect(turtle::parse_str(text), format.name()),
        // Named graphs are folded into the one provenance graph.
        GraphFormat::JsonLd => {
            let parser = JsonLdParser::new();
            let quads = QuadParser::<&[u8]>::parse(&parser, text.as_bytes());
            collect(quads.to_triples(), format.name())
        }
    }
}

fn collect<S: TripleSource>(mut source: S, format: &'static str) -> Result<Graph, GraphParseError> {
    let mut graph = Graph::new();
    source
        .try_for_each_triple(|t| {
            graph.insert(convert(&t, format)?);
            Ok::<(), GraphParseError>(())
        })
        .map_err(|e| match e {
            StreamError::SourceError(e) => GraphParseError::Syntax {
                format,
                message: e.to_string(),
            },
            StreamError::SinkError(e) => e,
        })?;
    Ok(graph)
}

fn convert<T: RdfTriple>(t: &T, format: &'static str) -> Result<Triple, GraphParseError> {
    let subject = term(t.s(), format)?;
    let predicate = t
        .p()
        .iri()
        .map(|iri| iri.as_str().to_owned())
        .ok_or_else(|| GraphParseError::UnsupportedTerm {
            format,
            detail: "predicate is not an IRI".to_owned(),
        })?;
    let object = term(t.o(), format)?;
    Ok(Triple::new(subject, predicate, object))
}

fn term<T: RdfTerm>(t: T, format: &'static str) -> Result<Term, GraphParseError> {
    if let Some(iri) = t.iri() {
        return Ok(Term::iri(iri.as_str()));
    }
    if let Some(id) = t.bnode_id() {
        return Ok(Term::blank(id.as_str()));
    }
    if let Some(lexical) = t.lexical_form() {
        let lexical = String::from(&*lexical);
        if let Some(lang) = t.language_tag() {
            return Ok(Literal::lang_string(lexical, lang.as_str()).into());
        }
        let datatype = t
            .datatype()
            .map_or_else(|| XSD_STRING.to_owned(), |dt| dt.as_str().to_owned());
        return Ok(Literal::typed(lexical, datatype).into());
    }
    Err(GraphParseError::UnsupportedTerm {
        format,
        detail: format!("{:?} term", t.kind()),
    })
}
