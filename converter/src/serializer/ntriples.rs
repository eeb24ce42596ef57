//! N-Triples serializer.
//!
//! Produces a valid N-Triples document (one triple per line, absolute IRIs).
//! N-Triples is suitable for streaming, bulk loading, and diff-friendly storage.

use crate::model::iris::XSD_STRING;
use crate::model::{Graph, Term};

use super::escape_string;

/// Serializes a graph to an N-Triples string.
#[must_use]
pub fn to_ntriples(graph: &Graph) -> String {
    let mut out = String::with_capacity(128 * graph.len());
    for t in graph {
        out.push_str(&term(&t.subject));
        out.push_str(" <");
        out.push_str(&t.predicate);
        out.push_str("> ");
        out.push_str(&term(&t.object));
        out.push_str(" .\n");
    }
    out
}

fn term(term: &Term) -> String {
    match term {
        Term::Iri(iri) => format!("<{iri}>"),
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal(lit) => {
            let escaped = escape_string(&lit.lexical);
            match &lit.language {
                Some(lang) => format!("\"{escaped}\"@{lang}"),
                None if lit.datatype == XSD_STRING => format!("\"{escaped}\""),
                None => format!("\"{escaped}\"^^<{}>", lit.datatype),
            }
        }
    }
}
