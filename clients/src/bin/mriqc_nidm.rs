//! `mriqc-nidm`: Converts MRIQC quality-control metrics to NIDM provenance
//! graphs, augmenting existing graphs instead of overwriting them.
//!
//! **Outputs** (under `--out`):
//! - `nidm/sub-<id>[/ses-<label>]/sub-<id>[_ses-<label>].{ttl,jsonld,nt}`
//! - `nidm/sub-<id>[/ses-<label>]/sub-<id>[_ses-<label>]_summary.json`
//! - `nidm/dataset_description.json`
//! - `logs/mriqc-nidm-<timestamp>.log`
//!
//! **Usage:**
//! ```text
//! mriqc-nidm convert --subject 01 --metrics sub-01_T1w.json --out derivatives
//! mriqc-nidm batch --mriqc-dir derivatives/mriqc --out derivatives [--nidm-input-dir nidm]
//! mriqc-nidm reformat --subject 01 --existing-graph nidm.ttl --out derivatives --format jsonld
//! ```
//!
//! Exits non-zero if any subject fails.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mriqc_nidm::layout::{discover_scans, BidsEntities};
use mriqc_nidm::pipeline::{write_dataset_description, BatchOptions};
use mriqc_nidm::{
    ConversionSummary, Converter, Mode, OutputLayout, ScanInput, SessionLabel, SubjectJob,
    SubjectLabel,
};
use mriqc_nidm_clients::{init_logging, software_identity, ConfigArgs};

/// Convert MRIQC metrics to NIDM.
#[derive(Parser)]
#[command(
    name = "mriqc-nidm",
    version,
    about = "Convert MRIQC quality-control metrics to NIDM provenance graphs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log every mapping decision.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Convert the metrics of one subject (or session).
    Convert(ConvertArgs),
    /// Convert every subject found in an MRIQC output directory.
    Batch(BatchArgs),
    /// Re-serialize an existing graph without adding metrics.
    Reformat(ReformatArgs),
}

#[derive(Args)]
struct PriorArgs {
    /// Prior graph to augment.
    #[arg(long, conflicts_with = "nidm_input_dir")]
    existing_graph: Option<PathBuf>,

    /// Directory searched for the subject's prior graph.
    #[arg(long)]
    nidm_input_dir: Option<PathBuf>,
}

#[derive(Args)]
struct ConvertArgs {
    /// Subject label, with or without `sub-`.
    #[arg(long)]
    subject: String,

    /// Session label, with or without `ses-`.
    #[arg(long)]
    session: Option<String>,

    /// MRIQC metrics JSON file; repeat for several scans.
    #[arg(long, required = true)]
    metrics: Vec<PathBuf>,

    /// Output root.
    #[arg(long)]
    out: PathBuf,

    /// generate, update, convert or replace (default: update when a prior
    /// graph exists, else generate).
    #[arg(long)]
    mode: Option<Mode>,

    #[command(flatten)]
    prior: PriorArgs,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct BatchArgs {
    /// MRIQC output directory.
    #[arg(long)]
    mriqc_dir: PathBuf,

    /// Output root.
    #[arg(long)]
    out: PathBuf,

    /// Only these subjects; repeat for several.
    #[arg(long)]
    participant_label: Vec<String>,

    /// Only these sessions; repeat for several.
    #[arg(long)]
    session_label: Vec<String>,

    /// Mode for every subject.
    #[arg(long)]
    mode: Option<Mode>,

    /// Directory searched for prior graphs.
    #[arg(long)]
    nidm_input_dir: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args)]
struct ReformatArgs {
    /// Subject label, with or without `sub-`.
    #[arg(long)]
    subject: String,

    /// Session label, with or without `ses-`.
    #[arg(long)]
    session: Option<String>,

    /// Output root.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    prior: PriorArgs,

    #[command(flatten)]
    config: ConfigArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let out = match &cli.command {
        Command::Convert(args) => &args.out,
        Command::Batch(args) => &args.out,
        Command::Reformat(args) => &args.out,
    };
    let layout = OutputLayout::new(out);
    if let Some(log) = init_logging(cli.verbose, Some(&layout.logs_dir()))? {
        tracing::debug!(path = %log.display(), "logging to file");
    }

    let ok = match cli.command {
        Command::Convert(args) => convert(args, layout, cli.verbose)?,
        Command::Batch(args) => batch(args, layout, cli.verbose)?,
        Command::Reformat(args) => reformat(args, layout)?,
    };
    if !ok {
        process::exit(1);
    }
    Ok(())
}

fn labels(subject: &str, session: Option<&str>) -> Result<(SubjectLabel, Option<SessionLabel>)> {
    let subject = SubjectLabel::parse(subject)?;
    let session = session.map(SessionLabel::parse).transpose()?;
    Ok((subject, session))
}

fn attach_prior(job: SubjectJob, prior: &PriorArgs) -> SubjectJob {
    match (&prior.existing_graph, &prior.nidm_input_dir) {
        (Some(path), _) => SubjectJob {
            prior: Some(path.clone()),
            ..job
        },
        (None, Some(dir)) => job.with_prior_from(dir),
        (None, None) => job,
    }
}

fn acquisition(path: &Path) -> Option<String> {
    BidsEntities::from_path(path)
        .map(|e| e.acquisition())
        .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
}

fn convert(args: ConvertArgs, layout: OutputLayout, verbose: bool) -> Result<bool> {
    let config = args.config.resolve()?;
    let software = software_identity(&config, args.metrics.first().map(PathBuf::as_path));
    let converter = Converter::new(config, layout).context("Failed to load the data dictionary")?;

    let (subject, session) = labels(&args.subject, args.session.as_deref())?;
    let mut job = SubjectJob::new(subject, session);
    job.scans = args
        .metrics
        .iter()
        .map(|path| ScanInput::file(path, acquisition(path)))
        .collect();
    job.mode = args.mode;
    let job = attach_prior(job, &args.prior);

    let summary = converter.convert(&job)?;
    print_summary(&summary, verbose);
    write_dataset_description(converter.layout(), &software)?;
    Ok(true)
}

fn batch(args: BatchArgs, layout: OutputLayout, verbose: bool) -> Result<bool> {
    if !args.mriqc_dir.is_dir() {
        bail!("MRIQC directory {} does not exist", args.mriqc_dir.display());
    }
    let config = args.config.resolve()?;
    let index = discover_scans(&args.mriqc_dir);
    let first_metrics = index.values().flatten().next().map(|scan| scan.path.clone());
    let software = software_identity(&config, first_metrics.as_deref());
    let converter = Converter::new(config, layout).context("Failed to load the data dictionary")?;

    let options = BatchOptions {
        mode: args.mode,
        nidm_input_dir: args.nidm_input_dir,
        participants: args
            .participant_label
            .iter()
            .map(|l| SubjectLabel::parse(l))
            .collect::<Result<_, _>>()?,
        sessions: args
            .session_label
            .iter()
            .map(|l| SessionLabel::parse(l))
            .collect::<Result<_, _>>()?,
    };
    let jobs = Converter::jobs_from_scans(&index, &options);
    if jobs.is_empty() {
        bail!("no MRIQC metrics found in {}", args.mriqc_dir.display());
    }

    let report = converter.convert_all(&jobs);
    for summary in &report.converted {
        print_summary(summary, verbose);
    }
    for (label, err) in &report.failed {
        eprintln!("[FAIL] {label}: {err}");
    }
    write_dataset_description(converter.layout(), &software)?;

    println!();
    println!(
        "Summary: {} converted, {} failed",
        report.converted.len(),
        report.failed.len()
    );
    Ok(report.is_success())
}

fn reformat(args: ReformatArgs, layout: OutputLayout) -> Result<bool> {
    if args.prior.existing_graph.is_none() && args.prior.nidm_input_dir.is_none() {
        bail!("reformat needs --existing-graph or --nidm-input-dir");
    }
    let config = args.config.resolve()?;
    let converter = Converter::new(config, layout).context("Failed to load the data dictionary")?;

    let (subject, session) = labels(&args.subject, args.session.as_deref())?;
    let mut job = SubjectJob::new(subject, session);
    job.mode = Some(Mode::Convert);
    let job = attach_prior(job, &args.prior);

    let summary = converter.convert(&job)?;
    print_summary(&summary, false);
    Ok(true)
}

fn print_summary(summary: &ConversionSummary, verbose: bool) {
    let session = summary
        .session
        .as_ref()
        .map(|s| format!("_ses-{s}"))
        .unwrap_or_default();
    println!(
        "[OK] sub-{}{session}: {} ({}), {} metrics ({} dictionary, {} fallback), {} statements",
        summary.subject,
        summary.mode,
        summary.state,
        summary.metrics,
        summary.dictionary_terms,
        summary.fallback_terms,
        summary.statements
    );
    for output in &summary.outputs {
        println!("       Written: {}", output.path.display());
    }
    for failed in &summary.failed_formats {
        println!("       Failed:  {} ({})", failed.format, failed.error);
    }
    if verbose && !summary.fallback_keys.is_empty() {
        println!("       Fallback keys: {}", summary.fallback_keys.join(", "));
    }
}
