//! svtk-hooks - Survey session tracking service
//!
//! Serves the hook-point API that the survey engine calls on every page view,
//! post-back, and completion.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use svtk_common::config::{RootFolderInitializer, TomlConfig};
use svtk_common::db::init_database;
use svtk_hooks::decoder::{QuestionCatalog, SqliteCatalog};
use svtk_hooks::dispatch::ChannelDispatcher;
use svtk_hooks::tracker::Tracker;
use svtk_hooks::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for svtk-hooks
#[derive(Parser, Debug)]
#[command(name = "svtk-hooks")]
#[command(about = "Survey session tracking and lifecycle event service")]
#[command(version)]
struct Args {
    /// Config file (overrides SVTK_CONFIG and the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder for the database and logs
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Listen address, e.g. 127.0.0.1:5740
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(config: &TomlConfig, event_log: Option<PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", config.logging.level).into());

    let file_layer = match event_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open event log {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TomlConfig::load(args.config.as_deref());
    if let Some(root) = args.root_folder {
        config.root_folder = Some(root);
    }
    if let Some(bind) = args.bind {
        config.bind = Some(bind);
    }

    let initializer = RootFolderInitializer::new(config.root_folder());
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;

    let event_log = config
        .logging
        .event_log
        .then(|| initializer.event_log_path());
    init_tracing(&config, event_log)?;

    info!(
        "Starting svtk-hooks v{}, root folder {}",
        env!("CARGO_PKG_VERSION"),
        config.root_folder().display()
    );

    let db_path = initializer.database_path();
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database ready: {}", db_path.display());

    let catalog: Arc<dyn QuestionCatalog> = match &config.catalog.database_path {
        Some(path) => match SqliteCatalog::connect_readonly(path).await {
            Ok(catalog) => Arc::new(catalog),
            Err(e) => {
                warn!("Catalog database unavailable ({}), using local tables", e);
                Arc::new(SqliteCatalog::new(pool.clone()))
            }
        },
        None => Arc::new(SqliteCatalog::new(pool.clone())),
    };

    let dispatcher = ChannelDispatcher::from_config(&config, Some(initializer.journal_path()));
    info!(
        threshold_minutes = config.tracking.abandon_threshold_minutes(),
        scan_every_seconds = config.tracking.self_scan_interval().num_seconds(),
        duplicate_rows = ?config.tracking.duplicate_rows,
        "Session tracking configured"
    );

    let tracker = Tracker::new(pool, catalog, dispatcher, &config.tracking);
    let app = build_router(AppState::new(tracker));

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("svtk-hooks listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
