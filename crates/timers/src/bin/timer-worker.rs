//! Timer worker: runs the in-process job queue, the topic executor and the
//! periodic reconciler against PostgreSQL.
//!
//! ```text
//! timer-worker run          # default: rehydrate, then serve until Ctrl-C
//! timer-worker reconcile    # execute whatever is due once and exit
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use lapse_core::config::{load_dotenv, PostgresConfig};
use lapse_core::{Config, SharedClock, SystemClock};
use lapse_queue::{LocalJobQueue, LocalQueueConfig};
use lapse_timers::{PgTimerStore, PgTopicProvider, Reconciler, TimerExecutor, TimerLifecycle};

#[derive(Parser, Debug)]
#[command(name = "timer-worker", version, about)]
struct Cli {
    /// Config profile; keys are read as `{PROFILE}_{KEY}` before `{KEY}`.
    #[arg(long, env = "LAPSE_PROFILE")]
    profile: Option<String>,

    /// Maximum PostgreSQL connections. Defaults to `PG_MAX_CONNECTIONS`.
    #[arg(long)]
    max_connections: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Execute timers until interrupted.
    Run,
    /// Resubmit due timers, execute them, and exit.
    Reconcile,
}

struct Worker {
    queue: Arc<LocalJobQueue>,
    reconciler: Reconciler,
}

impl Worker {
    fn new(pool: PgPool, config: &Config) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        let store = Arc::new(PgTimerStore::new(pool.clone()));
        let topics = Arc::new(PgTopicProvider::new(pool));

        let queue = Arc::new(LocalJobQueue::new(
            LocalQueueConfig::from(&config.timers),
            clock.clone(),
        ));
        let executor = Arc::new(TimerExecutor::new(store.clone(), topics, clock.clone()));
        executor.register(&queue);

        let lifecycle = Arc::new(TimerLifecycle::new(store, queue.clone(), clock));
        Self {
            queue,
            reconciler: Reconciler::new(lifecycle),
        }
    }
}

/// The `--max-connections` flag wins over `PG_MAX_CONNECTIONS`; never zero.
fn pool_size(pg: &PostgresConfig, flag: Option<u32>) -> u32 {
    flag.unwrap_or(pg.max_connections).max(1)
}

async fn connect(pg: &PostgresConfig, max_connections: Option<u32>) -> anyhow::Result<PgPool> {
    if !pg.is_configured() {
        warn!("PG_URL / PG_USERNAME not set, connecting with defaults");
    }
    let max_connections = pool_size(pg, max_connections);
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&pg.connection_string())
        .await
        .with_context(|| format!("failed to connect to PostgreSQL at {}", pg.host))?;
    info!(host = %pg.host, database = %pg.database, max_connections, "PostgreSQL connected");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("database migrations applied");
    Ok(pool)
}

async fn run(worker: Worker, config: &Config) -> anyhow::Result<()> {
    if config.timers.rehydrate_on_boot {
        worker.reconciler.rehydrate().await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let queue_task = tokio::spawn({
        let queue = worker.queue.clone();
        let rx = shutdown_rx.clone();
        async move { queue.run(rx).await }
    });

    let interval = config.timers.reconcile_interval();
    let reconciler = worker.reconciler;
    let reconcile_task = tokio::spawn(async move { reconciler.run_periodic(interval, shutdown_rx).await });

    info!("timer-worker running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);

    queue_task.await?;
    reconcile_task.await?;
    info!("timer-worker exited cleanly");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };
    config.log_summary();

    let pool = connect(&config.postgres, cli.max_connections).await?;
    let worker = Worker::new(pool, &config);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(worker, &config).await?,
        Command::Reconcile => {
            let report = worker.reconciler.reconcile().await?;
            let run = worker.queue.run_due().await;
            info!(
                found = report.found,
                failed = report.failed,
                executed = run.succeeded,
                retried = run.retried,
                dropped = run.dropped,
                "one-shot reconcile finished"
            );
        }
    }

    Ok(())
}
