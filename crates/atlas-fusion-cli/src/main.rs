//! atlas-fusion - multi-atlas label fusion pipeline
//!
//! ## Commands
//!
//! - `run`: segment every subject of a manifest with age-matched atlases
//! - `check`: verify that every collaborator binary can be found

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use atlas_fusion_core::{
    init_tracing, parse_label_list, parse_max_threads, validate_output_prefix, AtlasLibrary,
    Pipeline, PipelineConfig, SubjectManifest,
};
use atlas_fusion_tools::{check_dependencies, ProcessToolkit};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "atlas-fusion")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-atlas segmentation with label fusion", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment every subject listed in a manifest
    Run(RunArgs),

    /// Check that every collaborator binary can be found
    Check,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Atlas manifest (default: <atlas root>/atlases.txt)
    #[arg(short = 'a', long = "atlas-manifest")]
    atlas_manifest: Option<PathBuf>,

    /// Comma-separated label scheme suffixes to process
    #[arg(short = 'l', long = "labels")]
    label_suffixes: Option<String>,

    /// Prefix of the fused output names
    #[arg(short = 'p', long = "prefix", value_parser = prefix_arg)]
    output_prefix: Option<String>,

    /// Text file of `<imagePath> <age>` lines
    subject_manifest: PathBuf,

    /// Directory receiving one working directory per subject
    output_dir: PathBuf,

    /// Maximum number of collaborator processes running at once
    #[arg(value_parser = max_threads_arg)]
    max_threads: usize,
}

fn prefix_arg(raw: &str) -> std::result::Result<String, String> {
    validate_output_prefix(raw)
        .map(|()| raw.to_string())
        .map_err(|e| e.to_string())
}

fn max_threads_arg(raw: &str) -> std::result::Result<usize, String> {
    parse_max_threads(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Check => cmd_check(),
    }
}

/// Environment defaults with the command-line overrides applied.
fn build_config(args: &RunArgs) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::from_env().context("Invalid ATLAS_FUSION_* environment")?;
    if let Some(manifest) = &args.atlas_manifest {
        config = config.with_atlas_manifest(manifest);
    }
    if let Some(labels) = &args.label_suffixes {
        config = config.with_label_suffixes(parse_label_list(labels));
    }
    if let Some(prefix) = &args.output_prefix {
        config = config.with_output_prefix(prefix);
    }
    let config = config
        .with_output_dir(&args.output_dir)
        .with_max_threads(args.max_threads);
    config.validate()?;
    Ok(config)
}

fn invocation() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let config = build_config(&args)?;

    let toolkit = ProcessToolkit::from_config(&config.toolkit)
        .context("Collaborator binaries are missing")?;
    let atlases = AtlasLibrary::load(&config.atlas_manifest, &config.atlas_root)?;
    let subjects = SubjectManifest::load(&args.subject_manifest)?;

    if atlases.is_empty() {
        warn!(manifest = %config.atlas_manifest.display(), "atlas manifest lists no atlases");
    }
    if subjects.is_empty() {
        warn!(manifest = %args.subject_manifest.display(), "subject manifest lists no subjects");
    }
    info!(
        subjects = subjects.len(),
        atlases = atlases.len(),
        output = %config.output_dir().display(),
        "manifests loaded"
    );

    let pipeline = Pipeline::new(Arc::new(config), Arc::new(toolkit), atlases, subjects)
        .with_invocation(invocation());
    let report = pipeline.run().await.context("Pipeline run failed")?;

    print!("{}", report.render_summary());
    Ok(())
}

fn cmd_check() -> Result<()> {
    let config = PipelineConfig::from_env().context("Invalid ATLAS_FUSION_* environment")?;
    let binaries = check_dependencies(&config.toolkit)?;
    for (collaborator, program) in binaries.iter() {
        println!("{:<18} {}", collaborator.name(), program.display());
    }
    report_manifest("atlas manifest", &config.atlas_manifest);
    Ok(())
}

fn report_manifest(what: &str, path: &Path) {
    if path.is_file() {
        println!("{:<18} {}", what, path.display());
    } else {
        println!("{:<18} {} (not found)", what, path.display());
    }
}
