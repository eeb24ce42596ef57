//! Turtle 1.1 serializer.
//!
//! Produces a document that declares every registered prefix, then one block
//! per subject with its predicate-object pairs separated by `;`.

use crate::model::iris::{RDF_TYPE, XSD_STRING};
use crate::model::{Graph, Literal, Term};
use crate::namespaces::Namespaces;

use super::escape_string;

/// Serializes a graph to a Turtle string.
#[must_use]
pub fn to_turtle(graph: &Graph, namespaces: &Namespaces) -> String {
    let mut out = String::with_capacity(64 * graph.len() + 1024);

    for (prefix, iri) in namespaces.iter() {
        out.push_str(&format!("@prefix {prefix}: <{iri}> .\n"));
    }

    let mut current: Option<&Term> = None;
    for triple in graph {
        if current == Some(&triple.subject) {
            out.push_str(" ;\n");
        } else {
            if current.is_some() {
                out.push_str(" .\n");
            }
            out.push('\n');
            out.push_str(&node(&triple.subject, namespaces));
            out.push('\n');
            current = Some(&triple.subject);
        }
        let predicate = if triple.predicate == RDF_TYPE {
            "a".to_owned()
        } else {
            iri(&triple.predicate, namespaces)
        };
        out.push_str(&format!("    {predicate} {}", node(&triple.object, namespaces)));
    }
    if current.is_some() {
        out.push_str(" .\n");
    }

    out
}

fn iri(iri: &str, namespaces: &Namespaces) -> String {
    namespaces
        .compact(iri)
        .unwrap_or_else(|| format!("<{iri}>"))
}

fn node(term: &Term, namespaces: &Namespaces) -> String {
    match term {
        Term::Iri(i) => iri(i, namespaces),
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal(lit) => literal(lit, namespaces),
    }
}

fn literal(lit: &Literal, namespaces: &Namespaces) -> String {
    let quoted = format!("\"{}\"", escape_string(&lit.lexical));
    match &lit.language {
        Some(lang) => format!("{quoted}@{lang}"),
        None if lit.datatype == XSD_STRING => quoted,
        None => format!("{quoted}^^{}", iri(&lit.datatype, namespaces)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::iris;
    use crate::model::Triple;

    fn sample() -> Graph {
        let act = Term::iri(format!("{}qc_sub-01_20240101T000000Z", iris::NIIRI));
        [
            Triple::new(act.clone(), RDF_TYPE, Term::iri(iris::PROV_ACTIVITY)),
            Triple::new(act.clone(), format!("{}snr.csf", iris::QC_RAW), Literal::double(12.5)),
            Triple::new(act, format!("{}a%20b", iris::QC_RAW), Literal::string("say \"hi\"")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn declares_all_prefixes() {
        let ns = Namespaces::standard();
        let ttl = to_turtle(&Graph::new(), &ns);
        for (prefix, _) in ns.iter() {
            assert!(ttl.contains(&format!("@prefix {prefix}:")), "missing prefix {prefix}");
        }
    }

    #[test]
    fn groups_by_subject_and_compacts() {
        let ttl = to_turtle(&sample(), &Namespaces::standard());
        assert_eq!(ttl.matches("niiri:qc_sub-01_20240101T000000Z\n").count(), 1);
        assert!(ttl.contains("    a prov:Activity"));
        assert!(ttl.contains("qcraw:snr.csf \"12.5\"^^xsd:double"));
        assert!(ttl.contains("<http://purl.org/nidash/mriqc/raw#a%20b> \"say \\\"hi\\\"\""));
        assert!(ttl.trim_end().ends_with(" ."));
    }

    #[test]
    fn output_is_stable() {
        let ns = Namespaces::standard();
        assert_eq!(to_turtle(&sample(), &ns), to_turtle(&sample(), &ns));
    }
}
