//! Shared setup for the `mriqc-nidm` command-line clients.

#![deny(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    missing_docs,
    clippy::missing_errors_doc
)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use mriqc_nidm::{ConverterConfig, GraphFormat, SoftwareAgent};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global subscriber: an `EnvFilter` (`RUST_LOG`, else `info` or
/// `debug` when `verbose`), a stderr layer and, when `log_dir` is given, a
/// plain-text file layer writing `mriqc-nidm-<timestamp>.log`.
///
/// Returns the log file path.
///
/// # Errors
///
/// Returns an error if the log file cannot be created or a subscriber is
/// already installed.
pub fn init_logging(verbose: bool, log_dir: Option<&Path>) -> Result<Option<PathBuf>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let (file_layer, log_path) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = dir.join(format!(
                "mriqc-nidm-{}.log",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ));
            let file = File::create(&path)
                .with_context(|| format!("Failed to create log file {}", path.display()))?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Arc::new(file));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to install the log subscriber")?;
    Ok(log_path)
}

/// Configuration flags shared by every conversion subcommand. Each one set
/// overrides the config file.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Data dictionary CSV (default: the packaged dictionary).
    #[arg(long)]
    pub dictionary: Option<PathBuf>,

    /// Output format; repeat for several (turtle, jsonld, ntriples).
    #[arg(long = "format")]
    pub formats: Vec<GraphFormat>,

    /// Namespace for metrics missing from the dictionary.
    #[arg(long)]
    pub fallback_namespace: Option<String>,

    /// Describe dictionary terms with comments and units.
    #[arg(long)]
    pub describe_terms: bool,

    /// QC software name (default: read from the metrics, else `mriqc`).
    #[arg(long)]
    pub software_name: Option<String>,

    /// QC software version (default: read from the metrics).
    #[arg(long)]
    pub software_version: Option<String>,
}

impl ConfigArgs {
    /// Loads the config file (if any) and applies the flags on top.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed.
    pub fn resolve(&self) -> Result<ConverterConfig> {
        let mut config = match &self.config {
            Some(path) => ConverterConfig::from_file(path)?,
            None => ConverterConfig::default(),
        };
        if self.dictionary.is_some() {
            config.dictionary.clone_from(&self.dictionary);
        }
        if !self.formats.is_empty() {
            config.formats.clone_from(&self.formats);
        }
        if let Some(ns) = &self.fallback_namespace {
            config.fallback_namespace.clone_from(ns);
        }
        if self.describe_terms {
            config.describe_terms = true;
        }
        if self.software_name.is_some() {
            config.software_name.clone_from(&self.software_name);
        }
        if self.software_version.is_some() {
            config.software_version.clone_from(&self.software_version);
        }
        Ok(config)
    }
}

/// Software identity for `dataset_description.json`: config overrides, then
/// the provenance block of `metrics` (if readable), then defaults.
#[must_use]
pub fn software_identity(config: &ConverterConfig, metrics: Option<&Path>) -> SoftwareAgent {
    let mut software = metrics
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .map(|doc| SoftwareAgent::from_provenance(&doc))
        .unwrap_or_default();
    if let Some(name) = &config.software_name {
        software.name.clone_from(name);
    }
    if let Some(version) = &config.software_version {
        software.version.clone_from(version);
    }
    software
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.toml");
        std::fs::write(&path, "formats = [\"ntriples\"]\nsoftware_version = \"23.0\"\n").unwrap();

        let args = ConfigArgs {
            config: Some(path.clone()),
            ..ConfigArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.formats, vec![GraphFormat::NTriples]);

        let args = ConfigArgs {
            config: Some(path),
            formats: vec![GraphFormat::JsonLd],
            software_version: Some("24.1".to_owned()),
            describe_terms: true,
            ..ConfigArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.formats, vec![GraphFormat::JsonLd]);
        assert_eq!(config.software_version.as_deref(), Some("24.1"));
        assert!(config.describe_terms);
    }

    #[test]
    fn software_identity_prefers_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = dir.path().join("sub-01_T1w.json");
        std::fs::write(
            &metrics,
            r#"{"provenance": {"software": "mriqc", "version": "23.1.0"}}"#,
        )
        .unwrap();
        let mut config = ConverterConfig::default();
        assert_eq!(
            software_identity(&config, Some(&metrics)),
            SoftwareAgent::new("mriqc", "23.1.0")
        );
        config.software_version = Some("24.0.0".to_owned());
        assert_eq!(
            software_identity(&config, Some(&metrics)).version,
            "24.0.0"
        );
        assert_eq!(
            software_identity(&ConverterConfig::default(), None),
            SoftwareAgent::default()
        );
    }
}
