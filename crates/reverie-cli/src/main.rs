//! `reverie` command-line entry point.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use reverie_client::BackendClient;
use reverie_core::{BatchConfig, Result, Settings};
use reverie_dispatch::{
    BatchOrchestrator, BatchReport, CommandSubmitter, OrchestratorConfig, RedisResultStore,
};

#[derive(Parser)]
#[command(name = "reverie", version, about = "Batch job dispatch and completion tracking")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one batch described by a JSON batch file
    Run {
        /// Path to the batch file
        batch_file: PathBuf,

        /// Wall-clock deadline for the completion-wait phase, in seconds
        #[arg(long)]
        deadline_secs: Option<u64>,

        /// Seconds between result store poll cycles
        #[arg(long)]
        poll_interval_secs: Option<u64>,

        /// Size of the submission worker pool
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Plan and deduplicate only; submit nothing
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            batch_file,
            deadline_secs,
            poll_interval_secs,
            max_concurrent,
            dry_run,
        } => {
            match run_batch(
                &batch_file,
                deadline_secs,
                poll_interval_secs,
                max_concurrent,
                dry_run,
            )
            .await
            {
                Ok(report) if report.success() => ExitCode::SUCCESS,
                Ok(_) => ExitCode::FAILURE,
                Err(e) => {
                    error!(error = %e, "batch run failed");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

async fn run_batch(
    batch_file: &PathBuf,
    deadline_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    max_concurrent: Option<usize>,
    dry_run: bool,
) -> Result<BatchReport> {
    let settings = Settings::from_env()?;
    let batch = BatchConfig::load(batch_file)?;

    // Precedence: flags over batch file over defaults.
    let mut config = OrchestratorConfig::default()
        .apply_batch(&batch)
        .with_dry_run(dry_run);
    if let Some(secs) = deadline_secs {
        config = config.with_deadline(Duration::from_secs(secs));
    }
    if let Some(secs) = poll_interval_secs {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(max) = max_concurrent {
        config = config.with_max_concurrent(max);
    }

    let submitter = Arc::new(CommandSubmitter::new(&settings));
    let store = Arc::new(RedisResultStore::connect(&settings.redis_url).await?);
    let api = Arc::new(BackendClient::new(&settings)?);
    let engine = BatchOrchestrator::new(submitter, store, api, config);

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, finishing current cycle");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let report = engine.run(&batch, &mut shutdown_rx).await?;

    info!(
        planned = report.planned,
        skipped = report.skipped_duplicate,
        submitted = report.submitted,
        failed = report.failed_to_submit,
        materialized = report.materialized,
        timed_out = report.timed_out,
        "batch complete"
    );
    if report.untracked > 0 {
        warn!(
            untracked = report.untracked,
            "some jobs were accepted without a handle and could not be tracked"
        );
    }
    if !report.outstanding.is_empty() {
        warn!(
            handles = ?report.outstanding,
            "jobs still pending in the queue; results remain in the store"
        );
    }

    Ok(report)
}
