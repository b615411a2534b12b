use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use transmute_core::{
    load_config, validate_config, ConversionService, ConverterDispatch, FileStorage, JobStore,
    RetentionSweeper, SqliteJobStore,
};
use transmute_server::api::create_router;
use transmute_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,tower_http=debug".into());
    let json = std::env::var("TRANSMUTE_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("TRANSMUTE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        "transmute {} starting (config {})",
        VERSION,
        &config_hash[..16]
    );
    info!("Database path: {:?}", config.database.path);

    // Job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to open job store")?,
    );
    info!("Job store initialized");

    // Converter plugins
    let dispatch = ConverterDispatch::from_config(&config.converters, &config.operations);
    for (name, e) in dispatch.validate_all().await {
        warn!("Converter {} is unavailable: {}", name, e);
    }
    info!(
        "Converters: {:?}, operations: {:?}",
        dispatch.categories(),
        dispatch.operation_names()
    );

    // Storage directories
    let storage = FileStorage::new(&config.storage.upload_dir, &config.storage.output_dir);
    storage
        .ensure_dirs()
        .await
        .context("Failed to create storage directories")?;

    let service = ConversionService::new(
        Arc::clone(&store),
        Arc::new(dispatch),
        storage.clone(),
        config.conversion.clone(),
    )
    .with_max_upload_bytes(config.storage.max_upload_bytes());

    // Jobs left processing by a previous run can never resolve
    let recovered = service
        .recover_interrupted()
        .context("Failed to recover interrupted conversions")?;
    if recovered > 0 {
        warn!("Marked {} interrupted conversions as failed", recovered);
    }

    // Retention sweeper
    let sweeper = Arc::new(RetentionSweeper::new(
        config.retention.clone(),
        storage,
        store,
    ));
    sweeper.start().await;

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, service, Some(Arc::clone(&sweeper))));

    // Create router
    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error");

    info!("Server shutting down...");
    sweeper.stop().await;
    info!("Retention sweeper stopped");

    served
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
