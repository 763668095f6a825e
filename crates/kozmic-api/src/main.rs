//! Kozmic server: HTTP surface plus the job worker pool.

use std::sync::Arc;

use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kozmic_api::{AppState, routes};
use kozmic_bus::{Bus, RedisBus};
use kozmic_config::Config;
use kozmic_core::notify::TracingNotifier;
use kozmic_db::create_pool;
use kozmic_docker::DockerDriver;
use kozmic_github::GitHubClient;
use kozmic_runner::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    info!("connecting to the database...");
    let pool = create_pool(&config.database_url).await?;

    info!("connecting to the pub/sub endpoint...");
    let bus: Arc<dyn Bus> = Arc::new(RedisBus::connect(&config.redis.url()).await?);

    info!("connecting to the container engine...");
    let driver = Arc::new(DockerDriver::connect(&config.docker)?);

    let code_host = Arc::new(GitHubClient::new(config.github_token.clone()));
    let notifier = Arc::new(TracingNotifier);

    let listen_addr = config.listen_addr.clone();
    let worker_count = config.worker_count;
    let state = AppState::new(pool, config, driver, bus, code_host, notifier);

    for i in 0..worker_count {
        let worker = Worker::new(
            format!("worker-{i}"),
            state.queue.clone(),
            state.runner.clone(),
        );
        tokio::spawn(async move { worker.run().await });
    }
    info!(worker_count, "job workers started");

    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(addr = %listen_addr, "starting server");
    let listener = TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
