use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod stores;

use config::{Action, AppConfig};
use services::{
    blob_store::BlobStore,
    hierarchy_service::HierarchyService,
    thumbnail_worker::{ImageThumbnailer, ThumbnailWorker},
    worker_runner::WorkerRunner,
};
use stores::{SqliteJobQueue, SqliteMetadataStore, SqliteSessionStore};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + action ---
    let (cfg, action) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting files-manager with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        std::fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection + schema ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    let sessions = SqliteSessionStore::new(db.clone());

    match action {
        Action::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        Action::IssueToken(user_id) => {
            let token = sessions.issue(&user_id, cfg.session_ttl).await?;
            println!("{}", token);
            return Ok(());
        }
        Action::Serve => {}
    }

    match sessions.purge_expired().await {
        Ok(n) if n > 0 => tracing::info!("Purged {} expired sessions", n),
        Ok(_) => {}
        Err(err) => tracing::warn!("Failed to purge expired sessions: {}", err),
    }

    // --- Initialize core services ---
    let metadata = Arc::new(SqliteMetadataStore::new(db.clone()));
    let queue = SqliteJobQueue::new(db.clone(), cfg.worker.max_attempts);
    let service = HierarchyService::new(
        Arc::new(sessions),
        metadata.clone(),
        Arc::new(queue.clone()),
        BlobStore::new(&cfg.storage_dir),
    );

    // --- Start thumbnail worker ---
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ThumbnailWorker::new(metadata, Arc::new(ImageThumbnailer));
    let worker_handle =
        tokio::spawn(WorkerRunner::new(queue, worker, cfg.worker.clone()).run(shutdown_rx));

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    worker_handle.await?;

    Ok(())
}
