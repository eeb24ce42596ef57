//! JSON-LD 1.1 serializer.
//!
//! Produces a single compact document: an `@context` holding every registered
//! prefix and an `@graph` array with one node object per subject. Plain
//! strings are written as JSON strings; every other literal becomes a value
//! object so its lexical form and datatype survive a round trip.

use serde_json::{json, Map, Value};

use crate::model::iris::RDF_TYPE;
use crate::model::{Graph, Term};
use crate::namespaces::Namespaces;

/// Serializes a graph to a JSON-LD `Value`.
///
/// The returned value can be pretty-printed with [`serde_json::to_string_pretty`].
#[must_use]
pub fn to_json_ld(graph: &Graph, namespaces: &Namespaces) -> Value {
    json!({
        "@context": build_context(namespaces),
        "@graph": build_graph(graph, namespaces)
    })
}

fn build_context(namespaces: &Namespaces) -> Value {
    let ctx: Map<String, Value> = namespaces
        .iter()
        .map(|(prefix, iri)| (prefix.to_owned(), json!(iri)))
        .collect();
    Value::Object(ctx)
}

fn build_graph(graph: &Graph, namespaces: &Namespaces) -> Value {
    // Statements arrive grouped by subject.
    let mut nodes: Vec<(&Term, Map<String, Value>)> = Vec::new();

    for triple in graph {
        if nodes.last().map(|(subject, _)| *subject) != Some(&triple.subject) {
            let mut node = Map::new();
            node.insert("@id".to_owned(), json!(node_id(&triple.subject, namespaces)));
            nodes.push((&triple.subject, node));
        }
        let Some((_, node)) = nodes.last_mut() else {
            continue;
        };

        let (key, value) = match &triple.object {
            Term::Iri(iri) if triple.predicate == RDF_TYPE => {
                ("@type".to_owned(), json!(compact(iri, namespaces)))
            }
            object => (
                compact(&triple.predicate, namespaces),
                object_value(object, namespaces),
            ),
        };
        push_value(node, key, value);
    }

    Value::Array(
        nodes
            .into_iter()
            .map(|(_, node)| Value::Object(node))
            .collect(),
    )
}

/// Adds `value` under `key`, turning a single value into an array on the
/// second occurrence.
fn push_value(node: &mut Map<String, Value>, key: String, value: Value) {
    match node.get_mut(&key) {
        None => {
            node.insert(key, value);
        }
        Some(Value::Array(values)) => values.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// JSON-LD 1.1 only expands a compact IRI through a prefix whose IRI ends
/// in a gen-delim character; other IRIs are written in full.
fn compact(iri: &str, namespaces: &Namespaces) -> String {
    namespaces
        .compact(iri)
        .filter(|curie| {
            curie
                .split_once(':')
                .and_then(|(prefix, _)| namespaces.get(prefix))
                .is_some_and(|ns| ns.ends_with([':', '/', '?', '#', '[', ']', '@']))
        })
        .unwrap_or_else(|| iri.to_owned())
}

fn node_id(term: &Term, namespaces: &Namespaces) -> String {
    match term {
        Term::Iri(iri) => compact(iri, namespaces),
        Term::Blank(label) => format!("_:{label}"),
        Term::Literal(lit) => lit.lexical.clone(),
    }
}

fn object_value(term: &Term, namespaces: &Namespaces) -> Value {
    match term {
        Term::Iri(_) | Term::Blank(_) => json!({ "@id": node_id(term, namespaces) }),
        Term::Literal(lit) if lit.is_plain_string() => json!(lit.lexical),
        Term::Literal(lit) => match &lit.language {
            Some(lang) => json!({ "@value": lit.lexical, "@language": lang }),
            None => json!({ "@value": lit.lexical, "@type": compact(&lit.datatype, namespaces) }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{iris, Literal, Triple};

    fn activity() -> Term {
        Term::iri(format!("{}qc_sub-01_20240101T000000Z", iris::NIIRI))
    }

    #[test]
    fn prefixes_without_gen_delim_are_not_used() {
        let ns = Namespaces::standard().with("ex", "http://example.org/term_");
        assert_eq!(compact("http://example.org/term_a", &ns), "http://example.org/term_a");
        assert_eq!(compact(iris::PROV_ACTIVITY, &ns), "prov:Activity");
    }

    #[test]
    fn produces_context_and_graph() {
        let doc = to_json_ld(&Graph::new(), &Namespaces::standard());
        assert_eq!(doc["@context"]["prov"], json!(iris::PROV));
        assert!(doc["@graph"].as_array().is_some_and(Vec::is_empty));
    }

    #[test]
    fn nodes_group_values() {
        let act = activity();
        let g: Graph = [
            Triple::new(act.clone(), RDF_TYPE, Term::iri(iris::PROV_ACTIVITY)),
            Triple::new(act.clone(), iris::RDFS_LABEL, Literal::string("T1w")),
            Triple::new(act.clone(), iris::RDFS_LABEL, Literal::string("bold")),
            Triple::new(act, format!("{}cjv", iris::MRIQC), Literal::double(0.4)),
        ]
        .into_iter()
        .collect();
        let doc = to_json_ld(&g, &Namespaces::standard());
        let nodes = doc["@graph"].as_array().unwrap();
        assert_eq!(nodes.len(), 1);
        let node = &nodes[0];
        assert_eq!(node["@id"], json!("niiri:qc_sub-01_20240101T000000Z"));
        assert_eq!(node["@type"], json!("prov:Activity"));
        assert_eq!(node["rdfs:label"], json!(["T1w", "bold"]));
        assert_eq!(node["mriqc:cjv"], json!({"@value": "0.4", "@type": "xsd:double"}));
    }

    #[test]
    fn iri_objects_are_node_references() {
        let g: Graph = [Triple::new(activity(), iris::PROV_USED, Term::iri("urn:uuid:1"))]
            .into_iter()
            .collect();
        let doc = to_json_ld(&g, &Namespaces::standard());
        assert_eq!(doc["@graph"][0]["prov:used"], json!({"@id": "urn:uuid:1"}));
    }
}
