mod api;
mod codec;
mod config;
mod db;
mod farm_directory;
mod ingest;
mod mqtt;
mod rules;
mod sink;
mod timer_store;

use std::time::Duration;

use anyhow::Result;
use tokio::{net::TcpListener, signal, time};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    config::Config,
    farm_directory::FarmDirectory,
    ingest::IngestionDispatcher,
    rules::RuleEngine,
    sink::ReadingSink,
    timer_store::DeviceTimerStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent — env vars may be set externally)
    let _ = dotenvy::dotenv();

    // Initialise tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    // Load config
    let config = Config::from_env()?;

    // Connect to DB and run migrations
    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    // Per-device cooldown state, shared between ingestion and eviction
    let timers = DeviceTimerStore::new();

    // Shared MQTT connection: publisher half + event loop
    let (publisher, event_loop) = mqtt::connect(&config);

    // Spawn the ingestion dispatcher driving the MQTT event loop
    {
        let dispatcher = IngestionDispatcher::new(
            FarmDirectory::new(pool.clone(), config.farm_cache_ttl()),
            timers.clone(),
            RuleEngine::new(config.thresholds()),
            publisher,
            ReadingSink::new(pool.clone(), config.persist_history),
            config.sink_timeout(),
        );
        let topic = config.telemetry_topic.clone();
        tokio::spawn(dispatcher.run(event_loop, topic));
    }

    // Spawn the idle-device eviction sweep
    {
        let timers = timers.clone();
        let max_idle = Duration::from_secs(config.device_idle_evict_secs);
        let sweep = Duration::from_secs(config.eviction_sweep_secs);

        tokio::spawn(async move {
            let mut ticker = time::interval(sweep);
            info!(
                sweep_secs = sweep.as_secs(),
                max_idle_secs = max_idle.as_secs(),
                "Device eviction sweep started"
            );
            loop {
                ticker.tick().await;
                timers.evict_idle(max_idle).await;
            }
        });
    }

    // Start HTTP server
    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(pool))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
