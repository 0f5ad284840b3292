use anyhow::{Context, Result};
use media_upload::assets::LocalAssetStore;
use media_upload::auth::JwtAuthenticator;
use media_upload::{
    start_api_server, AppState, Config, FfmpegRemuxer, FfprobeInspector, PgVideoStore,
    PipelineSettings, S3Store, UploadPipeline,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting media upload service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let videos = Arc::new(
        PgVideoStore::new(&config.database)
            .await
            .context("Failed to initialize video store")?,
    );

    // Run migrations if enabled
    if config.database.run_migrations {
        videos
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
    }

    let store = Arc::new(
        S3Store::new(&config.s3)
            .await
            .context("Failed to initialize S3 store")?,
    );

    let spool_dir = config.media.spool_dir();
    tokio::fs::create_dir_all(&spool_dir)
        .await
        .with_context(|| format!("Failed to create spool directory {}", spool_dir.display()))?;

    let pipeline = UploadPipeline::new(
        PipelineSettings::from_config(&config),
        Arc::new(FfprobeInspector::new(&config.media.ffprobe_path)),
        Arc::new(FfmpegRemuxer::new(&config.media.ffmpeg_path)),
        store,
        videos.clone(),
        LocalAssetStore::new(&config.media.assets_root, &config.api.public_base_url),
    );

    let api_state = AppState {
        pipeline: Arc::new(pipeline),
        authenticator: Arc::new(JwtAuthenticator::new(&config.auth)),
        videos,
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Upload service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down upload service");

    api_handle.abort();

    info!("Upload service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
