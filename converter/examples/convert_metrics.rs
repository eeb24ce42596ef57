//! Converts one MRIQC metrics document and prints the resulting graph.
//!
//! Run with: `cargo run --example convert_metrics -p mriqc-nidm [-- <metrics.json>]`

use mriqc_nidm::serializer::serialize;
use mriqc_nidm::{
    flatten, map_to_graph, strip_metadata, DictionaryIndex, GraphFormat, MappingContext, Mode,
    Namespaces, SoftwareAgent, SystemClock,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut doc: serde_json::Value = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => serde_json::json!({
            "cjv": 0.41,
            "snr": {"csf": 12.5},
            "fd_mean": 0.3,
            "provenance": {"software": "mriqc", "version": "24.0.0"},
        }),
    };

    let ns = Namespaces::standard();
    let dictionary = DictionaryIndex::packaged(&ns)?;
    let software = SoftwareAgent::from_provenance(&doc);
    strip_metadata(&mut doc, mriqc_nidm::flatten::DEFAULT_EXCLUDED_KEYS);
    let record = flatten(&doc, "example", None)?;

    let context = MappingContext::new(Mode::Generate, software);
    let fragment = map_to_graph(&record, &dictionary, &context, &SystemClock);

    println!("Metrics:     {}", record.len());
    println!("  dictionary {:>4}", fragment.mapped);
    println!("  fallback   {:>4}", fragment.fallback);
    for decision in &fragment.decisions {
        println!("  {:24} {:?} {}", decision.key, decision.source, decision.predicate);
    }
    println!();

    let turtle = serialize(&fragment.graph, GraphFormat::Turtle, &ns)?;
    println!("{}", String::from_utf8_lossy(&turtle));
    Ok(())
}
