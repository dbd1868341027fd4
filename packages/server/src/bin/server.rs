//! Seeds automation server
//!
//! Runs the pressure scheduler and the automation worker pool against
//! PostgreSQL until interrupted.

use std::sync::Arc;

use anyhow::{Context, Result};
use seeds_core::domains::automations::{builtin_automations, AutomationRegistry};
use seeds_core::kernel::jobs::{InMemoryJobQueue, JobQueue, WorkerPool};
use seeds_core::kernel::stores::{
    PgAutomationRunStore, PgAutomationSettingsStore, PgFollowupStore, PgSeedStore,
    PgTransactionStore,
};
use seeds_core::kernel::{BaseAI, NoopAI, OpenAIClient, PressureScheduler, ServerDeps};
use seeds_core::Config;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seeds_core=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting Seeds automation server");

    let config = Config::from_env().context("Failed to load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations applied");

    let ai: Arc<dyn BaseAI> = match &config.openai_api_key {
        Some(key) => Arc::new(OpenAIClient::new(key.clone(), config.openai_model.clone())?),
        None => {
            tracing::warn!("OPENAI_API_KEY not set, automations will generate nothing");
            Arc::new(NoopAI)
        }
    };

    let registry = AutomationRegistry::load(
        Arc::new(PgAutomationSettingsStore::new(pool.clone())),
        builtin_automations(),
        config.registry_load(),
    )
    .await
    .context("Failed to load automation registry")?;

    let job_queue: Arc<dyn JobQueue> = Arc::new(InMemoryJobQueue::new(config.queue()));

    let deps = Arc::new(
        ServerDeps::builder()
            .seeds(Arc::new(PgSeedStore::new(pool.clone())))
            .transactions(Arc::new(PgTransactionStore::new(pool.clone())))
            .followups(Arc::new(PgFollowupStore::new(pool.clone())))
            .automation_runs(Arc::new(PgAutomationRunStore::new(pool.clone())))
            .ai(ai)
            .registry(Arc::new(registry))
            .job_queue(job_queue.clone())
            .build(),
    );

    let workers = WorkerPool::start(deps.clone(), config.worker_pool());
    let scheduler = Arc::new(PressureScheduler::new(deps.clone(), config.scheduler()));
    scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    scheduler.stop().await;
    workers.close().await;
    job_queue.close().await;
    pool.close().await;

    tracing::info!("Seeds automation server stopped");
    Ok(())
}
