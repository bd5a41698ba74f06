//! ARMP: research metadata reconciliation pipeline.
//! Entry point for the `armp` harvest binary.

mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use armp_common::{organizations, HarvestCheckpoint, JobStatus, Organization, SourceSystem};
use armp_db::{CatalogGateway, CatalogStats, MemoryCatalog};
use armp_ingestion::{build_registry, FuzzyScorer, HarvestJob, HarvestProgress, HarvestSummary, Harvester};

#[derive(Debug, Parser)]
#[command(name = "armp", version, about = "Harvest and reconcile research metadata")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Harvest one source for one organization.
    Harvest {
        #[arg(long)]
        source: SourceSystem,
        /// ROR id or https://ror.org/ URL.
        #[arg(long)]
        org: String,
        #[arg(long)]
        max_records: Option<u64>,
    },
    /// Harvest one source for every configured organization.
    HarvestAll {
        #[arg(long)]
        source: SourceSystem,
        #[arg(long)]
        max_records: Option<u64>,
    },
    /// Print catalog counts and the last checkpoint of every job.
    Status,
    /// List the organizations in scope.
    Organizations,
}

#[derive(Serialize)]
struct StatusReport {
    catalog: CatalogStats,
    jobs: Vec<HarvestCheckpoint>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("armp_agent=debug,armp_ingestion=debug,armp_db=debug,info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::load().context("loading configuration")?;
    info!(
        snapshot = %config.database.snapshot_path,
        concurrency = config.harvest.concurrency,
        "Configuration loaded"
    );

    let orgs = config.organizations();
    let catalog = open_catalog(&config.database, orgs.clone()).await?;

    match cli.command {
        Command::Harvest { source, org, max_records } => {
            let org = organizations::strip_ror_prefix(&org).to_string();
            if !orgs.iter().any(|o| o.id == org) {
                anyhow::bail!("Organization {org} is not in scope; see `armp organizations`");
            }
            let jobs = vec![HarvestJob::new(source, org).with_max_records(max_records)];
            run_harvest(&config, catalog, jobs).await
        }
        Command::HarvestAll { source, max_records } => {
            let jobs = orgs
                .iter()
                .map(|o| HarvestJob::new(source, o.id.clone()).with_max_records(max_records))
                .collect();
            run_harvest(&config, catalog, jobs).await
        }
        Command::Status => {
            let report = StatusReport {
                catalog: catalog.stats().await?,
                jobs: catalog.list_checkpoints().await?,
            };
            print_json(&report)
        }
        Command::Organizations => print_json(&catalog.organizations().await?),
    }
}

async fn open_catalog(db: &config::DatabaseConfig, orgs: Vec<Organization>) -> anyhow::Result<Arc<MemoryCatalog>> {
    let path = db.snapshot_path.as_str();
    if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
    }
    let catalog = MemoryCatalog::open(path, orgs)
        .await
        .with_context(|| format!("opening catalog snapshot {path}"))?
        .with_compact_after(db.compact_after);
    Ok(Arc::new(catalog))
}

async fn run_harvest(config: &config::Config, catalog: Arc<MemoryCatalog>, jobs: Vec<HarvestJob>) -> anyhow::Result<()> {
    let adapters = build_registry(|system| config.sources.settings_for(system))?;

    let (progress_tx, progress_rx) = broadcast::channel(256);
    tokio::spawn(log_progress(progress_rx));

    let harvester = Harvester::new(
        catalog.clone(),
        adapters,
        Arc::new(FuzzyScorer::default()),
        config.pipeline(),
    )
    .with_progress(progress_tx);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the page in flight");
            on_signal.cancel();
        }
    });

    let summary = harvester.run_jobs(jobs, &cancel).await;
    catalog.flush().await.context("writing catalog snapshot")?;
    print_json(&summary)?;

    let failed = failed_jobs(&summary);
    if failed > 0 {
        anyhow::bail!("{failed} harvest job(s) ended on an error; rerun to resume from their checkpoints");
    }
    Ok(())
}

/// Aborted jobs, and jobs stopped on a page they could not fetch. An
/// operator cancellation is not a failure.
fn failed_jobs(summary: &HarvestSummary) -> usize {
    summary
        .jobs
        .iter()
        .filter(|j| j.status == JobStatus::Aborted || (j.status == JobStatus::Stopped && j.error.is_some()))
        .count()
}

async fn log_progress(mut rx: broadcast::Receiver<HarvestProgress>) {
    loop {
        match rx.recv().await {
            Ok(event) => info!(
                job     = %event.job,
                stage   = %event.stage,
                pages   = event.pages_committed,
                fetched = event.counts.fetched,
                errors  = event.counts.errors,
                "{}", event.message
            ),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "Progress log lagging"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
