//! Command-line interface and stage orchestration.

use crate::config::ArchiveConfig;
use crate::constants::{DEFAULT_MANIFEST_FILE, DEFAULT_WORKLOAD_FILE};
use crate::models::{FetchSummary, TaskManifest, TransformSummary};
use crate::planner::run_plan_stage;
use crate::scraper::run_fetch_stage;
use crate::transform::run_transform_stage;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "meteo-ingest")]
#[command(about = "Plan, fetch and merge hourly weather archive data into monthly Parquet files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Expand a workload file into a task manifest
    Plan {
        #[command(flatten)]
        workload: WorkloadArgs,
        #[command(flatten)]
        manifest: ManifestArgs,
    },
    /// Download raw daily files for every task in a manifest
    Fetch {
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        archive: ArchiveArgs,
    },
    /// Merge raw daily files into monthly structured files
    Transform {
        #[command(flatten)]
        manifest: ManifestArgs,
    },
    /// Run plan, fetch and transform in sequence
    Pipeline {
        #[command(flatten)]
        workload: WorkloadArgs,
        #[command(flatten)]
        manifest: ManifestArgs,
        #[command(flatten)]
        archive: ArchiveArgs,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct WorkloadArgs {
    /// Workload configuration (JSON)
    #[arg(short, long, default_value = DEFAULT_WORKLOAD_FILE)]
    pub config: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ManifestArgs {
    /// Task manifest written by `plan`
    #[arg(short, long, default_value = DEFAULT_MANIFEST_FILE)]
    pub manifest: PathBuf,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct ArchiveArgs {
    /// Override the archive API endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl ArchiveArgs {
    /// Default archive settings with any command-line overrides applied
    pub fn to_config(&self) -> ArchiveConfig {
        let mut config = ArchiveConfig::default();
        if let Some(endpoint) = &self.endpoint {
            config = config.with_endpoint(endpoint.as_str());
        }
        if let Some(timeout_secs) = self.timeout_secs {
            config = config.with_timeout_secs(timeout_secs);
        }
        config
    }
}

impl Args {
    pub fn get_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

/// Run the selected stage(s). Per-unit failures are reported in the
/// summaries; only structural failures surface as an error.
pub async fn run(args: Args) -> Result<()> {
    setup_logging(&args)?;
    debug!("Command line arguments: {:?}", args);

    match args.command {
        Command::Plan { workload, manifest } => {
            let planned = plan(&workload, &manifest)?;
            report_plan(&planned, &manifest);
        }
        Command::Fetch { manifest, archive } => {
            let summary = fetch(&manifest, &archive).await?;
            report_fetch(&summary);
        }
        Command::Transform { manifest } => {
            let summary = transform(&manifest).await?;
            report_transform(&summary);
        }
        Command::Pipeline {
            workload,
            manifest,
            archive,
        } => {
            info!("Starting pipeline");
            let planned = plan(&workload, &manifest)?;
            report_plan(&planned, &manifest);
            let fetched = fetch(&manifest, &archive).await?;
            report_fetch(&fetched);
            let transformed = transform(&manifest).await?;
            report_transform(&transformed);
        }
    }

    Ok(())
}

fn plan(workload: &WorkloadArgs, manifest: &ManifestArgs) -> Result<TaskManifest> {
    run_plan_stage(&workload.config, &manifest.manifest)
        .with_context(|| format!("Planning failed for {}", workload.config.display()))
}

async fn fetch(manifest: &ManifestArgs, archive: &ArchiveArgs) -> Result<FetchSummary> {
    run_fetch_stage(&manifest.manifest, archive.to_config())
        .await
        .with_context(|| format!("Fetch failed for {}", manifest.manifest.display()))
}

async fn transform(manifest: &ManifestArgs) -> Result<TransformSummary> {
    // Parquet reads and writes are blocking
    let path = manifest.manifest.clone();
    tokio::task::spawn_blocking(move || run_transform_stage(&path))
        .await
        .context("Transform task panicked")?
        .with_context(|| format!("Transform failed for {}", manifest.manifest.display()))
}

/// Set up structured logging based on CLI arguments
fn setup_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("meteo_ingest={}", log_level)));

    if args.quiet {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    }

    debug!("Logging initialized at level: {}", log_level);
    Ok(())
}

fn report_plan(manifest: &TaskManifest, args: &ManifestArgs) {
    println!("{}", "Plan complete".bright_green().bold());
    println!("   Tasks:     {}", manifest.tasks.len());
    println!("   Locations: {}", manifest.locations.len());
    println!("   Manifest:  {}", args.manifest.display());
}

fn report_fetch(summary: &FetchSummary) {
    println!("{}", "Fetch complete".bright_green().bold());
    println!("   Written: {}", summary.written);
    println!("   Skipped: {}", summary.skipped);
    println!("   Time:    {:.1}s", summary.processing_time_ms as f64 / 1000.0);
    if summary.failed > 0 {
        println!("{}", format!("   Failed:  {}", summary.failed).bright_red());
        for task in &summary.failed_tasks {
            println!(
                "     {} {} {}",
                task.location.bright_cyan(),
                task.date,
                task.reason.bright_black()
            );
        }
    }
}

fn report_transform(summary: &TransformSummary) {
    println!("{}", "Transform complete".bright_green().bold());
    println!("   Partitions written: {}", summary.processed);
    println!("   Rows written:       {}", summary.total_rows);
    println!("   Skipped (no data):  {}", summary.skipped);
    println!("   Time:               {:.1}s", summary.processing_time_ms as f64 / 1000.0);
    if summary.failed > 0 {
        println!(
            "{}",
            format!("   Failed:             {}", summary.failed).bright_red()
        );
    }
}
