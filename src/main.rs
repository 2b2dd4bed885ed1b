//! CLI entry point: argument parsing, logging init, exit-code mapping.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use credsweep::config::normalize_multi_values;
use credsweep::detect::custom::load_custom_detectors;
use credsweep::engine::{JsonlSink, PlainSink, Sink};
use credsweep::{
    default_detectors, CancellationToken, Detector, Engine, EngineConfig, FilesystemSource,
    FindingCategory, ResultsFilter, ScanReport, Source, EXIT_ERROR, EXIT_FINDINGS,
};

#[derive(Parser, Debug)]
#[command(
    name = "credsweep",
    version,
    about = "Scan filesystems for leaked credentials"
)]
struct Cli {
    /// Path to scan (file or directory).
    path: PathBuf,

    /// Verify candidate secrets against their remote endpoints.
    #[arg(long)]
    verify: bool,

    /// Exit with code 183 when any finding is emitted.
    #[arg(long)]
    fail: bool,

    /// Emit findings as JSON lines instead of human-readable text.
    #[arg(long)]
    json: bool,

    /// Detector/verifier worker count (0 = logical CPUs).
    #[arg(long, default_value_t = 0)]
    concurrency: usize,

    /// YAML file declaring additional regex detectors.
    #[arg(long, value_name = "FILE")]
    custom_detectors: Option<PathBuf>,

    /// Restrict the built-in detector set by name. Comma-separated, or
    /// repeat the flag; both work together.
    #[arg(long = "include-detectors")]
    include_detectors: Vec<String>,

    /// Categories emitted to the sink.
    /// Comma-separated from: verified, unverified, unknown,
    /// filtered_unverified.
    #[arg(long)]
    results: Option<String>,

    /// Drop unverified candidates below this Shannon entropy (bits/byte).
    #[arg(long, value_name = "BITS")]
    entropy_floor: Option<f32>,

    /// Emit every unverified occurrence instead of the first per detector
    /// per chunk.
    #[arg(long)]
    no_filter_unverified: bool,

    /// Verify every overlapping detector claim instead of the highest
    /// version only.
    #[arg(long)]
    verify_all_overlaps: bool,

    /// Do not expand archives.
    #[arg(long)]
    no_archives: bool,

    /// Maximum archive nesting depth.
    #[arg(long, default_value_t = 5)]
    archive_depth: u8,

    /// Wall-clock budget per archive, in seconds.
    #[arg(long, default_value_t = 30)]
    archive_timeout: u64,

    /// Custom verification endpoint, as `detector=url`. Repeatable.
    #[arg(long = "verification-endpoint", value_name = "DETECTOR=URL")]
    verification_endpoints: Vec<String>,

    /// Allow verification redirects into private address space (testing).
    #[arg(long, hide = true)]
    allow_unsafe_redirects: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let fail_requested = cli.fail;
    match run(cli) {
        Ok(report) => {
            if fail_requested && report.has_findings() {
                std::process::exit(EXIT_FINDINGS);
            }
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "scan failed");
            std::process::exit(EXIT_ERROR);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ScanReport> {
    let config = build_config(&cli)?;
    let detectors = build_detectors(&cli)?;
    let engine = Engine::new(config, detectors).context("engine construction failed")?;

    let mut source = Box::new(FilesystemSource::new(
        &cli.path,
        engine.config().reader.clone(),
        engine.config().archive.clone(),
    ));
    source
        .init(
            "filesystem",
            0,
            0,
            cli.verify,
            None,
            engine.config().resolved_detector_workers(),
        )
        .context("source init failed")?;

    let mut sink: Box<dyn Sink> = if cli.json {
        Box::new(JsonlSink::new(std::io::stdout()))
    } else {
        Box::new(PlainSink::new(std::io::stdout()))
    };

    let report = engine.scan(CancellationToken::new(), vec![source], sink.as_mut())?;
    std::io::stdout().flush().ok();
    Ok(report)
}

fn build_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = EngineConfig {
        detector_workers: cli.concurrency,
        verify: cli.verify,
        verify_all_overlaps: cli.verify_all_overlaps,
        filter_unverified: !cli.no_filter_unverified,
        entropy_floor: cli.entropy_floor,
        ..EngineConfig::default()
    };
    config.http.allow_unsafe_redirects = cli.allow_unsafe_redirects;
    config.archive.enabled = !cli.no_archives;
    config.archive.max_depth = cli.archive_depth;
    config.archive.timeout_secs = cli.archive_timeout;

    if let Some(results) = &cli.results {
        config.results = parse_results(results)?;
    }

    let mut endpoints = BTreeMap::new();
    for entry in &cli.verification_endpoints {
        let (detector, url) = entry
            .split_once('=')
            .with_context(|| format!("expected detector=url, got {entry:?}"))?;
        endpoints.insert(detector.to_string(), url.to_string());
    }
    config.endpoints = endpoints;

    Ok(config)
}

fn parse_results(spec: &str) -> anyhow::Result<ResultsFilter> {
    let mut categories = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        categories.push(match part {
            "verified" => FindingCategory::Verified,
            "unverified" => FindingCategory::Unverified,
            "unknown" => FindingCategory::Unknown,
            "filtered_unverified" => FindingCategory::FilteredUnverified,
            other => anyhow::bail!("unknown results category {other:?}"),
        });
    }
    Ok(ResultsFilter::new(categories))
}

fn build_detectors(cli: &Cli) -> anyhow::Result<Vec<Arc<dyn Detector>>> {
    let mut detectors = default_detectors();

    let include = normalize_multi_values(&cli.include_detectors);
    if !include.is_empty() {
        let wanted: Vec<String> = include.iter().map(|s| s.to_ascii_lowercase()).collect();
        let filtered: Vec<Arc<dyn Detector>> = detectors
            .iter()
            .filter(|d| wanted.contains(&d.detector_type().name().to_ascii_lowercase()))
            .cloned()
            .collect();
        if filtered.is_empty() {
            tracing::info!("no valid detectors specified, using default set");
        } else {
            detectors = filtered;
        }
    }

    if let Some(path) = &cli.custom_detectors {
        let custom = load_custom_detectors(path)
            .with_context(|| format!("loading custom detectors from {}", path.display()))?;
        tracing::info!(count = custom.len(), "loaded custom detectors");
        detectors.extend(custom);
    }

    Ok(detectors)
}
