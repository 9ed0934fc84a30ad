//! ADREP Server - Main entry point

use adrep_common::logging::{init_logging, LogConfig};
use adrep_ingest::{ImportOrchestrator, MemorySink, PgUpsertSink, StorageBackend, UpsertSink};
use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::{future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};
use tokio::{signal, sync::Notify};
use tracing::{info, warn};

use adrep_server::{config::Config, create_router};

#[tokio::main]
async fn main() -> Result<()> {
    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("adrep-server")
        .filter_directives("adrep_server=debug,adrep_ingest=debug,tower_http=debug,sqlx=info")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    info!("Starting ADREP Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let sink: Arc<dyn UpsertSink> = match config.ingest.storage {
        StorageBackend::Postgres => {
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .min_connections(config.database.min_connections)
                .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
                .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
                .connect(&config.database.url)
                .await?;
            info!("Database connection pool established");
            Arc::new(PgUpsertSink::new(db_pool))
        },
        StorageBackend::Memory => {
            info!("Using in-memory storage (INGEST_STORAGE=memory)");
            Arc::new(MemorySink::new())
        },
    };

    let orchestrator = ImportOrchestrator::new(config.ingest.clone(), sink);
    let sweeper = orchestrator.start_retention_sweeper();
    info!(
        job_workers = config.ingest.job_workers,
        persistence_workers = config.ingest.persistence_workers,
        batch_size = config.ingest.batch_size,
        "Import orchestrator started"
    );

    let app = create_router(orchestrator.clone(), &config);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let signalled = Arc::new(Notify::new());
    let trigger = Arc::clone(&signalled);
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            trigger.notify_one();
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = signalled.notified() => {
            let timeout_secs = config.server.shutdown_timeout_secs;
            info!("Waiting up to {} seconds for connections to close", timeout_secs);
            match tokio::time::timeout(Duration::from_secs(timeout_secs), &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!("Connections still open after {} seconds, closing", timeout_secs),
            }
        },
    }

    // Let running imports drain before exiting
    orchestrator.shutdown().await;
    sweeper.abort();

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
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
}
