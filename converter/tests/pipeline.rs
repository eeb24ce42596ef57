//! End-to-end conversions against a temporary filesystem.

use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use mriqc_nidm::layout::discover_scans;
use mriqc_nidm::model::iris;
use mriqc_nidm::parser::parse_file;
use mriqc_nidm::pipeline::BatchOptions;
use mriqc_nidm::{
    augment, Converter, ConverterConfig, ConversionError, FixedClock, Graph, GraphFormat,
    MergeError, MergeState, Mode, OutputLayout, ScanInput, SubjectJob, SubjectLabel, Term,
    Triple,
};
use serde_json::json;

const PRIOR_TTL: &str = "\
@prefix prov: <http://www.w3.org/ns/prov#> .
@prefix niiri: <http://iri.nidash.org/> .

niiri:sub-01 a prov:Agent ;
    <http://example.org/age> 34 .
niiri:acq_01 a prov:Activity .
";

fn clock(hour: u32) -> FixedClock {
    FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap())
}

fn converter(out: &Path, hour: u32) -> Converter {
    Converter::new(ConverterConfig::default(), OutputLayout::new(out))
        .unwrap()
        .with_clock(clock(hour))
}

fn sub01() -> SubjectLabel {
    SubjectLabel::parse("sub-01").unwrap()
}

fn write_prior(input: &Path) -> PathBuf {
    let path = input.join("sub-01/nidm.ttl");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, PRIOR_TTL).unwrap();
    path
}

fn t1w_job(doc: serde_json::Value) -> SubjectJob {
    let mut job = SubjectJob::new(sub01(), None);
    job.scans = vec![ScanInput::document(doc, Some("T1w".to_owned()))];
    job
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn nested_metric_and_dictionary_metric() {
    let dir = tempfile::tempdir().unwrap();
    let conv = converter(dir.path(), 9);
    let mut job = SubjectJob::new(SubjectLabel::parse("001").unwrap(), None);
    job.scans = vec![ScanInput::document(json!({"snr": {"csf": 12.5}, "fd_mean": 0.3}), None)];
    let summary = conv.convert(&job).unwrap();

    assert_eq!(summary.metrics, 2);
    assert_eq!(summary.dictionary_terms, 1);
    assert_eq!(summary.fallback_terms, 1);
    assert_eq!(summary.fallback_keys, vec!["snr.csf".to_owned()]);

    let (graph, _) = parse_file(&dir.path().join("nidm/sub-001/sub-001.ttl")).unwrap();
    let activity = Term::iri(&summary.activities[0]);
    assert_eq!(
        graph
            .objects(&activity, &format!("{}meanFramewiseDisplacement", iris::MRIQC))
            .count(),
        1
    );
    assert_eq!(
        graph
            .objects(&activity, &format!("{}snr.csf", iris::QC_RAW))
            .count(),
        1
    );
}

#[test]
fn no_input_dir_means_no_existing_graph_and_no_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty-input");
    std::fs::create_dir_all(&input).unwrap();
    let out = dir.path().join("out");

    let job = t1w_job(json!({"cjv": 0.4})).with_prior_from(&input);
    assert!(job.prior.is_none());
    let summary = converter(&out, 9).convert(&job).unwrap();

    assert_eq!(summary.state, MergeState::NoExistingGraph);
    assert_eq!(summary.mode, Mode::Generate);
    assert!(summary.prior_graph.is_none());
    let mut files: Vec<_> = std::fs::read_dir(out.join("nidm/sub-01"))
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    files.sort();
    assert_eq!(files, vec!["sub-01.jsonld", "sub-01.ttl", "sub-01_summary.json"]);
}

#[test]
fn update_copies_before_modifying() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("nidm-in");
    let prior = write_prior(&input);
    let original = std::fs::read(&prior).unwrap();
    let out = dir.path().join("out");

    let job = t1w_job(json!({"cjv": 0.4})).with_prior_from(&input);
    assert_eq!(job.prior.as_deref(), Some(prior.as_path()));
    let summary = converter(&out, 9).convert(&job).unwrap();

    assert_eq!(summary.mode, Mode::Update);
    assert_eq!(summary.state, MergeState::Merged);
    assert_eq!(std::fs::read(&prior).unwrap(), original);

    let (before, _) = parse_file(&prior).unwrap();
    let (after, _) = parse_file(&out.join("nidm/sub-01/sub-01.ttl")).unwrap();
    assert_eq!(before.len(), 3);
    assert!(after.is_superset(&before));
    assert!(after.len() > before.len());
    let (as_jsonld, _) = parse_file(&out.join("nidm/sub-01/sub-01.jsonld")).unwrap();
    assert_eq!(as_jsonld, after);
}

#[test]
fn exact_duplicates_are_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let prior = write_prior(dir.path());
    let niiri = |local: &str| Term::iri(format!("{}{local}", iris::NIIRI));
    let fragment: Graph = [
        Triple::new(niiri("acq_01"), iris::RDF_TYPE, Term::iri(iris::PROV_ACTIVITY)),
        Triple::new(niiri("acq_02"), iris::RDF_TYPE, Term::iri(iris::PROV_ACTIVITY)),
    ]
    .into_iter()
    .collect();

    let out = dir.path().join("out/sub-01.ttl");
    let outcome = augment(&fragment, None, Some(&prior), |_| out.clone()).unwrap();
    assert_eq!(outcome.graph.len(), 4);
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.state, MergeState::Merged);
    assert_eq!(std::fs::read_to_string(&prior).unwrap(), PRIOR_TTL);
}

#[test]
fn convert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("nidm-in");
    write_prior(&input);
    let out = dir.path().join("out");
    let conv = converter(&out, 9);

    let mut job = SubjectJob::new(sub01(), None).with_prior_from(&input);
    job.mode = Some(Mode::Convert);

    let first = conv.convert(&job).unwrap();
    assert_eq!(first.added, 0);
    assert_eq!(first.metrics, 0);
    let snapshot: Vec<Vec<u8>> = first
        .outputs
        .iter()
        .map(|o| std::fs::read(&o.path).unwrap())
        .collect();

    let second = conv.convert(&job).unwrap();
    for (output, bytes) in second.outputs.iter().zip(&snapshot) {
        assert_eq!(&std::fs::read(&output.path).unwrap(), bytes, "{}", output.path.display());
    }
}

#[test]
fn convert_without_prior_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut job = SubjectJob::new(sub01(), None);
    job.mode = Some(Mode::Convert);
    let err = converter(dir.path(), 9).convert(&job).unwrap_err();
    assert!(matches!(
        err,
        ConversionError::Merge {
            source: MergeError::NothingToConvert,
            ..
        }
    ));
}

#[test]
fn replace_drops_the_superseded_activity() {
    let dir = tempfile::tempdir().unwrap();
    let first_out = dir.path().join("first");
    let first = converter(&first_out, 9)
        .convert(&t1w_job(json!({"cjv": 0.5})))
        .unwrap();
    let old_activity = Term::iri(&first.activities[0]);

    let mut job = t1w_job(json!({"cjv": 0.6})).with_prior_from(&first_out.join("nidm"));
    job.mode = Some(Mode::Replace);
    let second_out = dir.path().join("second");
    let second = converter(&second_out, 10).convert(&job).unwrap();

    assert_eq!(second.state, MergeState::Replaced);
    assert!(second.removed > 0);
    let (graph, _) = parse_file(&second_out.join("nidm/sub-01/sub-01.ttl")).unwrap();
    assert!(graph.iter().all(|t| t.subject != old_activity));
    let new_activity = Term::iri(&second.activities[0]);
    assert_eq!(graph.instances_of(iris::PROV_ACTIVITY).collect::<Vec<_>>(), vec![&new_activity]);
}

#[test]
fn unparsable_prior_is_kept_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("nidm-in");
    let prior = input.join("sub-01/nidm.ttl");
    std::fs::create_dir_all(prior.parent().unwrap()).unwrap();
    std::fs::write(&prior, "not turtle at all").unwrap();
    let out = dir.path().join("out");

    let job = t1w_job(json!({"cjv": 0.4})).with_prior_from(&input);
    let err = converter(&out, 9).convert(&job).unwrap_err();
    let ConversionError::Merge { source, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(source.is_recoverable());
    assert_eq!(std::fs::read(&prior).unwrap(), b"not turtle at all");
    assert_eq!(
        std::fs::read(out.join("nidm/sub-01/sub-01.ttl")).unwrap(),
        b"not turtle at all"
    );
}

#[test]
fn prior_format_is_always_written() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("nidm-in");
    write_prior(&input);
    let out = dir.path().join("out");
    let config = ConverterConfig {
        formats: vec![GraphFormat::NTriples],
        ..ConverterConfig::default()
    };
    let conv = Converter::new(config, OutputLayout::new(&out))
        .unwrap()
        .with_clock(clock(9));

    let summary = conv
        .convert(&t1w_job(json!({"cjv": 0.4})).with_prior_from(&input))
        .unwrap();
    let formats: Vec<_> = summary.outputs.iter().map(|o| o.format).collect();
    assert_eq!(formats, vec![GraphFormat::NTriples, GraphFormat::Turtle]);
    let (nt, _) = parse_file(&out.join("nidm/sub-01/sub-01.nt")).unwrap();
    let (ttl, _) = parse_file(&out.join("nidm/sub-01/sub-01.ttl")).unwrap();
    assert_eq!(nt, ttl);
}

#[test]
fn batch_over_an_mriqc_tree() {
    let dir = tempfile::tempdir().unwrap();
    let mriqc = dir.path().join("mriqc");
    let write = |rel: &str, body: &str| {
        let path = mriqc.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    };
    write(
        "sub-01/ses-a/anat/sub-01_ses-a_T1w.json",
        r#"{"cjv": 0.4, "provenance": {"software": "mriqc", "version": "24.0.0"}}"#,
    );
    write("sub-01/ses-a/func/sub-01_ses-a_task-rest_bold.json", r#"{"fd_mean": 0.2}"#);
    write("sub-01/ses-a/func/sub-01_ses-a_task-rest_timeseries.json", "[]");
    write("sub-02/anat/sub-02_T1w.json", "{");

    let jobs = Converter::jobs_from_scans(&discover_scans(&mriqc), &BatchOptions::default());
    assert_eq!(jobs.len(), 2);

    let out = dir.path().join("out");
    let report = converter(&out, 9).convert_all(&jobs);
    assert_eq!(report.converted.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "sub-02");

    let converted = &report.converted[0];
    assert_eq!(converted.session.as_deref(), Some("a"));
    assert_eq!(converted.scans, 2);
    assert_eq!(converted.activities.len(), 2);
    assert!(out.join("nidm/sub-01/ses-a/sub-01_ses-a.ttl").is_file());

    let only_02 = BatchOptions {
        participants: vec![SubjectLabel::parse("02").unwrap()],
        ..BatchOptions::default()
    };
    assert_eq!(Converter::jobs_from_scans(&discover_scans(&mriqc), &only_02).len(), 1);
}
