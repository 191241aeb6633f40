use axum::Router;
use sqlx::PgPool;
use std::net::SocketAddr;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fitpass::api::middleware::auth::AppState;
use fitpass::config::Config;
use fitpass::services::notifier::Notifier;
use fitpass::{api, db, jobs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fitpass=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting fitpass server...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    // Run migrations
    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Start the nightly generation + expiry sweep schedule
    start_jobs(pool.clone(), &config).await?;
    tracing::info!("Background jobs scheduled");

    // Build application state
    let state = AppState {
        pool: pool.clone(),
        config: config.clone(),
        notifier: Notifier::from_config(&config),
    };

    // Build router
    let app = Router::new()
        .merge(api::health::router())
        .merge(api::bookings::router())
        .merge(api::checkin::router())
        .merge(api::packages::router())
        .merge(api::schedules::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Listening on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Schedules the class-instance generation and package expiry sweep. The
/// jobs are stateless between invocations; the admin API can trigger the
/// same entry points manually at any time.
async fn start_jobs(pool: PgPool, config: &Config) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create job scheduler: {:?}", e))?;

    let months_ahead = config.generate_months_ahead;
    let job = Job::new_async(config.jobs_cron.as_str(), move |_id, _scheduler| {
        let pool = pool.clone();
        Box::pin(async move {
            if let Err(e) = jobs::instance_generator::run(&pool, months_ahead).await {
                tracing::error!(error = %e, "Instance generation job failed");
            }
            if let Err(e) = jobs::package_expiry::run(&pool).await {
                tracing::error!(error = %e, "Package expiry job failed");
            }
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid jobs cron expression: {:?}", e))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("failed to add scheduled job: {:?}", e))?;

    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start job scheduler: {:?}", e))?;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("Shutdown signal received, cleaning up...");
}
