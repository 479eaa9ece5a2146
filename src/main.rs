use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use evidence_anchor::config::Config;
use evidence_anchor::error::{IntegrityError, Result};
use evidence_anchor::server::{self, AppState};
use evidence_anchor::service::IntegrityService;
use evidence_anchor::state::memory::{MemoryAnchorStore, MemoryReportRepository};
use evidence_anchor::state::models::Actor;
use evidence_anchor::state::repository::{PgAnchorStore, PgReportRepository};
use evidence_anchor::state::{AnchorStore, Database, ReportRepository, DEFAULT_REFRESH_BATCH};
use evidence_anchor::worker::AnchorQueue;

#[derive(Parser)]
#[command(name = "evidence-anchor")]
#[command(about = "Tamper-evidence anchoring and integrity verification for incident reports")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Principal recorded for mutating commands
    #[arg(long, global = true, default_value = "system")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API and the background anchor worker
    Serve,
    /// Anchor one report now (idempotent)
    Anchor { report_id: String },
    /// Show the anchor record of a report
    Status { report_id: String },
    /// Check a report against its anchored fingerprint
    Verify { report_id: String },
    /// Poll the ledger for pending anchors
    RefreshConfirmations {
        #[arg(long, default_value_t = DEFAULT_REFRESH_BATCH)]
        max: usize,
        /// Confirmations required; defaults to the configured threshold
        #[arg(long)]
        min_conf: Option<i64>,
    },
    /// Look up an anchor by fingerprint or transaction id
    Search { hash: String },
    /// Anchor reports that were never anchored
    Backfill {
        #[arg(long, default_value_t = DEFAULT_REFRESH_BATCH)]
        limit: usize,
    },
    /// Give up on a pending or submitted anchor
    MarkFailed {
        report_id: String,
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let actor = Actor::new(cli.actor);
    let service = Arc::new(build_service(&config).await?);

    match cli.command {
        Commands::Serve => {
            let (queue, worker) = AnchorQueue::spawn(service.clone(), config.worker.queue_capacity);
            let state = AppState { service, queue };
            server::serve(state, &config.listen_addr).await?;
            // The router held the last queue handle; the worker drains and exits.
            if let Err(e) = worker.await {
                error!(error = %e, "Anchor worker panicked");
            }
        }
        Commands::Anchor { report_id } => {
            print_json(&service.anchor_report(&actor, &report_id).await?)?;
        }
        Commands::Status { report_id } => match service.get_anchor_status(&report_id).await? {
            Some(view) => print_json(&view)?,
            None => return Err(IntegrityError::AnchorNotFound(report_id)),
        },
        Commands::Verify { report_id } => {
            print_json(&service.verify_integrity(&report_id).await?)?;
        }
        Commands::RefreshConfirmations { max, min_conf } => {
            let summaries = service.refresh_confirmations(&actor, max, min_conf).await?;
            info!(checked = summaries.len(), "Confirmation refresh complete");
            print_json(&summaries)?;
        }
        Commands::Search { hash } => {
            print_json(&service.search_by_hash(&hash).await?)?;
        }
        Commands::Backfill { limit } => {
            print_json(&service.backfill(&actor, limit).await?)?;
        }
        Commands::MarkFailed { report_id, reason } => {
            print_json(&service.mark_anchor_failed(&actor, &report_id, &reason).await?)?;
        }
    }

    Ok(())
}

/// Wire stores and collaborators. Without a database URL everything lives
/// in memory, which is only useful for local experiments.
async fn build_service(config: &Config) -> Result<IntegrityService> {
    let (reports, anchors): (Arc<dyn ReportRepository>, Arc<dyn AnchorStore>) =
        match &config.database_url {
            Some(url) => {
                let db = Database::connect(url).await?;
                db.migrate().await?;
                (
                    Arc::new(PgReportRepository::new(db.pool().clone())),
                    Arc::new(PgAnchorStore::new(db.pool().clone())),
                )
            }
            None => {
                info!("No database configured, using in-memory stores");
                (
                    Arc::new(MemoryReportRepository::new()),
                    Arc::new(MemoryAnchorStore::new()),
                )
            }
        };

    Ok(IntegrityService::new(
        reports,
        anchors,
        Arc::new(config.anchor_service()?),
        config.content_store()?,
        config.anchor.confirmation_threshold,
    ))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| IntegrityError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}
