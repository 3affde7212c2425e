//! server-scout - game server discovery and intelligence daemon
//!
//! # Usage
//!
//! ```bash
//! # Long-running daemon: sweeps, retraining, enrichment, retention
//! STEAM_API_KEY=... server-scout run
//!
//! # One sweep over discovered (or given) addresses
//! server-scout scan-once 203.0.113.7:27015
//!
//! # Review loop
//! server-scout review
//! server-scout feedback 42 label:ttt --reason "map rotation is all ttt_"
//! server-scout retrain
//! ```
//!
//! # Environment Variables
//!
//! - `SCOUT_CONFIG`: path to a TOML config file
//! - `STEAM_API_KEY`: Web API key (listing source and enrichment)
//! - `RUST_LOG`: logging level (default: info)

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use server_scout::config::ScoutConfig;
use server_scout::discovery::{configured_sources, discover_all};
use server_scout::storage::retention;
use server_scout::types::{Feedback, Label, PlayerId, Verdict};
use server_scout::{Priority, ScoutContext};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "server-scout")]
#[command(about = "Game server discovery, classification and player enrichment")]
#[command(version)]
struct CliArgs {
    /// Config file (overrides $SCOUT_CONFIG and ./scout_config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Keep everything in memory; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Run every background task until Ctrl+C (default)
    Run {
        /// Start without the enrichment worker when no API key is set
        #[arg(long)]
        no_enrich: bool,
    },

    /// Discover (unless addresses are given) and sweep once
    ScanOnce {
        /// Probe these addresses instead of running discovery
        addrs: Vec<SocketAddr>,
    },

    /// List predictions waiting for review
    Review {
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Attach feedback to a prediction: accept, reject or label:<value>
    Feedback {
        id: u64,
        verdict: Verdict,
        #[arg(long)]
        reason: Option<String>,
    },

    /// Retrain both learned models from feedback now
    Retrain,

    /// Enrich the given player ids immediately
    Enrich {
        #[arg(required = true)]
        ids: Vec<PlayerId>,
    },
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Scanner,
    Retrainer,
    Enrichment,
    StaleSweep,
    Retention,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Scanner => write!(f, "Scanner"),
            TaskName::Retrainer => write!(f, "Retrainer"),
            TaskName::Enrichment => write!(f, "Enrichment"),
            TaskName::StaleSweep => write!(f, "StaleSweep"),
            TaskName::Retention => write!(f, "Retention"),
        }
    }
}

/// How long the supervisor waits for tasks after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ScoutConfig> {
    match path {
        Some(p) => ScoutConfig::load_from_file(p).with_context(|| format!("Failed to load {}", p.display())),
        None => Ok(ScoutConfig::load()),
    }
}

// ============================================================================
// Daemon
// ============================================================================

async fn run_daemon(ctx: ScoutContext, no_enrich: bool) -> Result<()> {
    let enrichment = match ctx.enrichment_worker() {
        Ok(worker) => Some(Arc::new(worker)),
        Err(e) if no_enrich => {
            warn!(error = %e, "Enrichment disabled");
            None
        }
        Err(e) => return Err(e).context("Enrichment needs an API key (or pass --no-enrich)"),
    };

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    let scheduler = Arc::new(ctx.scheduler());
    let token = cancel_token.clone();
    task_set.spawn(async move {
        info!("[Scanner] Task starting");
        scheduler.run(token).await;
        Ok(TaskName::Scanner)
    });

    let retrainer = Arc::new(ctx.retrainer());
    let interval = ctx.config.classifier.retrain_interval();
    let token = cancel_token.clone();
    task_set.spawn(async move {
        info!("[Retrainer] Task starting with interval {:?}", interval);
        retrainer.run(interval, token).await;
        Ok(TaskName::Retrainer)
    });

    let gateway = Arc::clone(&ctx.gateway);
    let retention_days = ctx.config.storage.snapshot_retention_days;
    let token = cancel_token.clone();
    task_set.spawn(async move {
        info!("[Retention] Task starting, keeping {} days of snapshots", retention_days);
        retention::run(gateway, retention_days, token).await;
        Ok(TaskName::Retention)
    });

    if let Some(worker) = enrichment {
        let stale_interval = ctx.config.enrichment.stale_sweep_interval();
        let sweeper = Arc::clone(&worker);
        let token = cancel_token.clone();
        task_set.spawn(async move {
            info!("[StaleSweep] Task starting with interval {:?}", stale_interval);
            sweeper.run_stale_sweep(stale_interval, token).await;
            Ok(TaskName::StaleSweep)
        });

        let token = cancel_token.clone();
        task_set.spawn(async move {
            info!("[Enrichment] Task starting");
            worker.run(token).await;
            Ok(TaskName::Enrichment)
        });
    }

    run_supervisor(&mut task_set, cancel_token).await
}

/// Monitor tasks; the first failure cancels the rest.
async fn run_supervisor(task_set: &mut JoinSet<Result<TaskName>>, cancel_token: CancellationToken) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring...");

    let outcome = loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break Ok(());
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: task failed with error: {}", e);
                        cancel_token.cancel();
                        break Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: task panicked: {}", e);
                        cancel_token.cancel();
                        break Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break Ok(());
                    }
                }
            }
        }
    };

    let drain = async {
        while let Some(result) = task_set.join_next().await {
            if let Ok(Ok(task_name)) = result {
                info!("Supervisor: task {} stopped", task_name);
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("Supervisor: tasks still running after {:?}, aborting", SHUTDOWN_GRACE);
        task_set.abort_all();
    }
    outcome
}

// ============================================================================
// One-shot commands
// ============================================================================

async fn scan_once(ctx: &ScoutContext, addrs: Vec<SocketAddr>) -> Result<()> {
    let addrs = if addrs.is_empty() {
        let sources = configured_sources(&ctx.config);
        discover_all(&sources).await.into_iter().collect()
    } else {
        addrs
    };
    info!(candidates = addrs.len(), "Starting one-off sweep");
    let stats = ctx.sweeper().sweep(&addrs).await;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn review(ctx: &ScoutContext, limit: usize) -> Result<()> {
    let pending = ctx.gateway.predictions_needing_review()?;
    if pending.is_empty() {
        println!("Nothing to review.");
        return Ok(());
    }
    for prediction in pending.iter().take(limit) {
        let server = ctx.gateway.get_server(prediction.server_id)?;
        let (name, addr) = server
            .map(|s| (s.name, s.addr.to_string()))
            .unwrap_or_else(|| ("<unknown>".to_string(), "-".to_string()));
        println!(
            "#{:<6} {:<9} {:<16} {:.2}  {}  [{}] {}",
            prediction.id, prediction.kind, prediction.label, prediction.confidence, name, addr, prediction.reason
        );
    }
    if pending.len() > limit {
        println!("... {} more", pending.len() - limit);
    }
    Ok(())
}

fn submit_feedback(ctx: &ScoutContext, id: u64, verdict: Verdict, reason: Option<String>) -> Result<()> {
    let Some(prediction) = ctx.gateway.get_prediction(id)? else {
        bail!("No prediction with id {}", id);
    };
    if let Verdict::Label(raw) = &verdict {
        Label::parse(prediction.kind, raw).map_err(anyhow::Error::msg)?;
    }
    let feedback = Feedback {
        verdict,
        reason,
        submitted_at: chrono::Utc::now(),
    };
    if !ctx.gateway.submit_feedback(id, feedback)? {
        bail!("Prediction {} already has feedback", id);
    }
    println!("Feedback recorded for prediction {}", id);
    Ok(())
}

fn retrain(ctx: &ScoutContext) -> Result<()> {
    let mut trained = 0;
    for (kind, result) in ctx.retrainer().retrain_all() {
        match result {
            Ok(report) => {
                trained += 1;
                println!(
                    "{}: {} samples, loss {:.4}, accuracy {:.2}",
                    kind, report.samples, report.final_loss, report.accuracy
                );
            }
            Err(e) => println!("{}: not retrained ({})", kind, e),
        }
    }
    if trained == 0 {
        warn!("No model was retrained");
    }
    Ok(())
}

async fn enrich(ctx: &ScoutContext, ids: Vec<PlayerId>) -> Result<()> {
    let worker = ctx.enrichment_worker()?;
    worker.enqueue(ids, Priority::High);
    let mut enriched = 0;
    let mut dropped = 0;
    while let Some(outcome) = worker.run_once().await {
        enriched += outcome.enriched + outcome.skipped;
        dropped += outcome.dropped;
        if worker.pending() > 0 {
            tokio::time::sleep(ctx.config.enrichment.batch_delay()).await;
        }
    }
    println!("{} players up to date, {} dropped", enriched, dropped);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(args.config.as_ref())?;
    let ctx = ScoutContext::open(config, args.ephemeral).context("Startup failed")?;

    match args.command.unwrap_or(SubCommand::Run { no_enrich: false }) {
        SubCommand::Run { no_enrich } => {
            info!("server-scout {} starting", env!("CARGO_PKG_VERSION"));
            run_daemon(ctx, no_enrich).await?;
            info!("✓ server-scout shutdown complete");
        }
        SubCommand::ScanOnce { addrs } => scan_once(&ctx, addrs).await?,
        SubCommand::Review { limit } => review(&ctx, limit)?,
        SubCommand::Feedback { id, verdict, reason } => submit_feedback(&ctx, id, verdict, reason)?,
        SubCommand::Retrain => retrain(&ctx)?,
        SubCommand::Enrich { ids } => enrich(&ctx, ids).await?,
    }
    Ok(())
}
