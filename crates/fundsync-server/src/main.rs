//! Fundsync Server - Main entry point

use anyhow::{Context, Result};
use fundsync_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, time::Duration};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use fundsync_server::{
    api,
    config::{Config, StorageBackend},
    features::FeatureState,
    ingest::{IngestRuntime, Stores},
};

#[tokio::main]
async fn main() -> Result<()> {
    let log_config = LogConfig::builder()
        .log_file_prefix("fundsync-server")
        .filter_directives("fundsync_server=debug,tower_http=debug,sqlx=info")
        .build();

    // environment variables take precedence
    let log_config = LogConfig::from_env_with(log_config).context("Invalid logging configuration")?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Fundsync Server");

    let config = Config::load()?;
    info!(
        host = %config.server.host,
        port = config.server.port,
        storage = %config.storage.backend,
        "Configuration loaded"
    );

    let stores = open_stores(&config).await?;

    let runtime = IngestRuntime::from_config(&config.ingest, stores.clone())
        .context("Failed to build ingestion runtime")?;
    let state = FeatureState {
        gateway: runtime.gateway(),
        logs: stores.logs.clone(),
    };

    let shutdown = CancellationToken::new();
    let scheduler = runtime
        .start(shutdown.clone())
        .await
        .context("Failed to recover job logs")?;
    info!(
        workers = config.ingest.worker_pool_size,
        "Job scheduler started"
    );

    let app = api::create_router(state, &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    // running jobs finish; queued ones stay queued for the next start
    shutdown.cancel();
    let drain = Duration::from_secs(config.server.shutdown_timeout_secs);
    match tokio::time::timeout(drain, scheduler).await {
        Ok(Ok(())) => info!("Job scheduler drained"),
        Ok(Err(e)) => warn!(error = %e, "Job scheduler task ended abnormally"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Running jobs did not finish in time; they will be failed on next start"
        ),
    }

    info!("Server shut down gracefully");

    Ok(())
}

async fn open_stores(config: &Config) -> Result<Stores> {
    match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; jobs and entities are lost on restart");
            Ok(Stores::memory())
        },
        StorageBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
                .connect(&config.database.url)
                .await
                .context("Failed to connect to database")?;
            info!("Database connection pool established");

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
            info!("Database migrations completed");

            Ok(Stores::postgres(pool))
        },
    }
}

/// Resolves on Ctrl+C or SIGTERM and cancels the scheduler token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }

    token.cancel();
}
