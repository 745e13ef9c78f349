use std::time::Duration;

use anyhow::Result;
use tracing::info;

use shuttle_dispatch_api::app::{build_state, create_app};
use shuttle_dispatch_api::config::Config;
use shuttle_dispatch_api::jobs::{
    ApproachingNotificationJob, JobScheduler, PendingNotificationSweepJob, PoolMetricsJob,
};
use shuttle_dispatch_api::middleware::{init_metrics, logging::init_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    init_logging(&config.logging)?;
    init_metrics()?;

    info!("Starting Shuttle Dispatch API v{}", env!("CARGO_PKG_VERSION"));

    let pool = persistence::db::create_pool(&config.pool_config()).await?;

    info!("Running database migrations...");
    sqlx::migrate!("../persistence/src/migrations")
        .run(&pool)
        .await?;
    info!("Migrations completed");

    let addr = config.socket_addr()?;
    let jobs_config = config.jobs.clone();
    let state = build_state(config, pool.clone())?;

    let mut scheduler = JobScheduler::new();
    scheduler.register(PoolMetricsJob::new(pool.clone()));
    if jobs_config.approaching_enabled {
        scheduler.register(ApproachingNotificationJob::new(
            pool,
            state.notifications.clone(),
            &jobs_config,
        ));
    }
    if jobs_config.pending_sweep_enabled {
        scheduler.register(PendingNotificationSweepJob::new(
            state.notifications.clone(),
            &jobs_config,
        ));
    }
    scheduler.start();

    let app = create_app(state);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
