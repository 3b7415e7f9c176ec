//! Offline Sync Server
//!
//! HTTP front end for the sync reconciliation core, backed by SQLite.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use offline_sync_server::audit::SqliteAuditSink;
use offline_sync_server::config::Config;
use offline_sync_server::db;
use offline_sync_server::routes;
use offline_sync_server::state::AppState;
use offline_sync_server::store::{EntityKind, EntityRegistry, SqliteEntityRepository, SqliteKvStore};
use offline_sync_server::SyncService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "offline_sync_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env();

    tracing::info!("Starting Offline Sync Server v{}", env!("CARGO_PKG_VERSION"));

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    // Register a repository for every entity kind
    let mut registry = EntityRegistry::new();
    for kind in EntityKind::ALL {
        registry.register(Arc::new(SqliteEntityRepository::new(db_pool.clone(), kind)));
    }

    let kv_store = Arc::new(SqliteKvStore::new(db_pool.clone()));
    let service = SyncService::new(
        Arc::new(registry),
        kv_store.clone(),
        Arc::new(SqliteAuditSink::new(db_pool.clone())),
        config.sync.clone(),
    );

    // Optional background maintenance; lazy expiry and manual cleanup otherwise
    if let Some(secs) = config.sync.cleanup_interval_secs {
        service
            .coordinator()
            .clone()
            .start_cleanup_task(Duration::from_secs(secs), config.sync.batch_retention_days);
        tracing::info!("Batch cleanup every {}s", secs);
    }
    if let Some(secs) = config.sync.sweep_interval_secs {
        service
            .sessions()
            .clone()
            .start_sweep_task(Duration::from_secs(secs));
        start_purge_task(kv_store, Duration::from_secs(secs));
        tracing::info!("Offline session sweep every {}s", secs);
    }

    let app = routes::app(AppState::new(config.clone(), service));

    // Start server with graceful shutdown
    let host: std::net::IpAddr = config
        .server
        .host
        .parse()
        .context("Invalid SERVER_HOST")?;
    let addr = SocketAddr::from((host, config.server.port));
    tracing::info!("Offline Sync Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Drop key/value rows whose TTL has elapsed
fn start_purge_task(store: Arc<SqliteKvStore>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);

        loop {
            interval.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged expired key/value entries"),
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired key/value entries"),
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
