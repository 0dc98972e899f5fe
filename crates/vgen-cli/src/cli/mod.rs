//! CLI for the vgen video-generation pipeline.

mod commands;
mod control_socket;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use vgen_core::bus::TaskBus;
use vgen_core::config::{self, VgenConfig};
use vgen_core::pool::AccountPool;
use vgen_core::remote::http::HttpApiFactory;
use vgen_core::service::Service;
use vgen_core::store::JobStore;
use vgen_core::watermark::HttpWatermarkRemover;
use vgen_core::worker::WorkerContext;

use commands::{
    run_accounts, run_add, run_cancel, run_list, run_pipeline, run_queue_status, run_remove,
    run_retry, run_show, run_start, run_system,
};

/// Top-level CLI for the vgen pipeline.
#[derive(Debug, Parser)]
#[command(name = "vgen")]
#[command(about = "vgen: automated video-generation pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Create a new draft job.
    Add {
        /// Generation prompt.
        prompt: String,
        /// Clip length in seconds (5, 10, or 15).
        #[arg(long, default_value = "5")]
        duration: i64,
        /// Aspect ratio: 16:9, 9:16, or 1:1.
        #[arg(long, default_value = "16:9")]
        ratio: String,
        /// Reference image; copied into the uploads dir.
        #[arg(long, value_name = "FILE")]
        image: Option<PathBuf>,
        /// Start the job immediately after creating it.
        #[arg(long)]
        start: bool,
    },

    /// List jobs.
    List {
        /// Restrict to "active" or "history".
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value = "0")]
        skip: i64,
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Show one job in full, including per-stage task state.
    Show {
        /// Job identifier.
        id: i64,
    },

    /// Start one or more jobs. Processed per id; failures don't stop the rest.
    Start {
        /// Job identifiers.
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Cancel one or more running jobs.
    Cancel {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Reset failed/cancelled jobs so they can run again. With --stage,
    /// re-enqueue a single stage of one job on the running daemon.
    Retry {
        #[arg(required = true)]
        ids: Vec<i64>,
        /// Stage to re-run: generate, poll, or download (single id only).
        #[arg(long)]
        stage: Option<String>,
    },

    /// Delete one or more jobs.
    Remove {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Run the pipeline: recover interrupted jobs, start the worker fleets,
    /// and serve until interrupted.
    Run,

    /// Show queue, database, and account statistics.
    QueueStatus,

    /// Pause the running pipeline (in-flight tasks finish).
    Pause,

    /// Resume a paused pipeline.
    Resume,

    /// Emergency reset: clear leases and the active set, push in-flight
    /// jobs back to pending.
    Reset,

    /// Reset active jobs that have been silent past the stale cutoff.
    ResetStale,

    /// Stop and restart the worker fleets of the running daemon.
    RestartWorkers,

    /// Account management.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum AccountsCommand {
    /// List accounts with status and credit columns.
    List,
    /// Import an account.
    Add {
        email: String,
        /// Encrypted password blob (opaque to vgen).
        #[arg(long)]
        password: Option<String>,
        /// Captured access token.
        #[arg(long)]
        token: Option<String>,
        #[arg(long, default_value = "0")]
        credits: i64,
    },
    /// Refresh the recorded credit balance of every live account.
    Credits,
}

/// Everything wired once per invocation: store, bus, pool, remote factory.
pub(crate) struct App {
    pub cfg: VgenConfig,
    pub store: JobStore,
    pub service: Service,
    pub ctx: Arc<WorkerContext>,
}

impl App {
    pub async fn build(cfg: VgenConfig) -> Result<Self> {
        let store = JobStore::open_at(&cfg.db_path()).await?;
        let bus = Arc::new(TaskBus::new(&cfg));
        let pool = Arc::new(AccountPool::new(store.clone(), cfg.platform.clone()));
        let http = reqwest::Client::new();
        let factory = Arc::new(HttpApiFactory::new(http.clone(), cfg.remote_base_url.clone()));
        let watermark = Arc::new(HttpWatermarkRemover::new(
            http.clone(),
            cfg.remote_base_url.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            cfg: cfg.clone(),
            store: store.clone(),
            bus: Arc::clone(&bus),
            pool: Arc::clone(&pool),
            api: factory.clone(),
            watermark,
            http,
        });
        let service = Service::new(
            cfg.clone(),
            store.clone(),
            Arc::clone(&bus),
            Arc::clone(&pool),
            factory,
        );

        Ok(Self {
            cfg,
            store,
            service,
            ctx,
        })
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let app = App::build(cfg).await?;

        match cli.command {
            CliCommand::Add {
                prompt,
                duration,
                ratio,
                image,
                start,
            } => run_add(&app, &prompt, duration, &ratio, image.as_deref(), start).await?,
            CliCommand::List {
                category,
                skip,
                limit,
            } => run_list(&app, category.as_deref(), skip, limit).await?,
            CliCommand::Show { id } => run_show(&app, id).await?,
            CliCommand::Start { ids } => run_start(&app, &ids).await?,
            CliCommand::Cancel { ids } => run_cancel(&app, &ids).await?,
            CliCommand::Retry { ids, stage } => run_retry(&app, &ids, stage.as_deref()).await?,
            CliCommand::Remove { ids } => run_remove(&app, &ids).await?,
            CliCommand::Run => run_pipeline(app).await?,
            CliCommand::QueueStatus => run_queue_status(&app).await?,
            CliCommand::Pause => run_system(&app, "pause").await?,
            CliCommand::Resume => run_system(&app, "resume").await?,
            CliCommand::Reset => run_system(&app, "reset").await?,
            CliCommand::ResetStale => run_system(&app, "reset-stale").await?,
            CliCommand::RestartWorkers => run_system(&app, "restart-workers").await?,
            CliCommand::Accounts { command } => run_accounts(&app, command).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
