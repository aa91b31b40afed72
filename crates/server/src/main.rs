use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobhub_core::config::{EngineBackend, LogFormat, StoreBackend, TranscoderBackend};
use jobhub_core::{
    load_config, spawn_purge_loop, validate_config, ChannelSink, Collaborators, Config,
    ConfigError, Fanout, FfmpegTranscoder, HttpTranscoder, JobManager, JobStore,
    LibrqbitEngine, LifecycleSettings, MemoryJobStore, PeerEngine, QBittorrentEngine, Retention,
    SanitizedConfig, SqliteJobStore, Transcoder, WebhookSink, YtDlpExtractor,
};

use jobhub_server::api::create_router;
use jobhub_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let config_path = std::env::var("JOBHUB_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let loaded = load_config(&config_path);
    init_tracing(
        loaded
            .as_ref()
            .map(|c| c.logging.format)
            .unwrap_or_default(),
    );

    if let Err(e) = run(&config_path, loaded).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run(config_path: &Path, loaded: Result<Config, ConfigError>) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);
    let config =
        loaded.with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&SanitizedConfig::from(&config)).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Storage root: {:?}", config.storage.root);

    let store = create_store(&config)?;
    let collaborators = create_collaborators(&config).await?;

    // Fanout: in-process channel for WebSocket clients, optional webhook
    let events = ChannelSink::new(config.notify.channel_capacity);
    let mut fanout = Fanout::new().with_sink(Arc::new(events.clone()));
    if let Some(url) = &config.notify.webhook_url {
        let webhook = WebhookSink::new(
            url.clone(),
            Duration::from_secs(config.notify.webhook_timeout_secs),
        )
        .context("Failed to create webhook sink")?;
        info!("Publishing job updates to webhook {}", url);
        fanout = fanout.with_sink(Arc::new(webhook));
    }

    let manager = JobManager::new(
        Arc::clone(&store),
        collaborators,
        fanout,
        LifecycleSettings::from_config(&config),
    );

    // Nothing survives a restart in the control tier
    match manager.reconcile_orphans().await {
        Ok(0) => {}
        Ok(n) => warn!("Marked {} orphaned jobs as failed", n),
        Err(e) => error!("Failed to reconcile orphaned jobs: {}", e),
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let purge_handle = spawn_purge_loop(
        Arc::clone(&store),
        Duration::from_secs(config.lifecycle.purge_interval_secs.max(1)),
        shutdown_rx,
    );

    let state = Arc::new(AppState::new(config.clone(), manager, events));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    let _ = shutdown_tx.send(());
    let _ = purge_handle.await;
    info!("Purge loop stopped");

    Ok(())
}

fn create_store(config: &Config) -> Result<Arc<dyn JobStore>> {
    let retention = Retention::new(
        Duration::from_secs(config.lifecycle.simple_retention_secs),
        Duration::from_secs(config.lifecycle.multi_file_retention_secs),
    );

    let store: Arc<dyn JobStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory job store");
            Arc::new(MemoryJobStore::new(retention))
        }
        StoreBackend::Sqlite => {
            info!("Using SQLite job store at {:?}", config.store.path);
            if let Some(parent) = config.store.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {:?}", parent)
                    })?;
                }
            }
            Arc::new(
                SqliteJobStore::new(&config.store.path, retention)
                    .context("Failed to create job store")?,
            )
        }
    };
    Ok(store)
}

async fn create_collaborators(config: &Config) -> Result<Collaborators> {
    let engine: Arc<dyn PeerEngine> = match config.engine.backend {
        EngineBackend::QBittorrent => {
            info!(
                "Using qBittorrent engine at {}",
                config.engine.qbittorrent.url
            );
            Arc::new(
                QBittorrentEngine::new(config.engine.qbittorrent.clone())
                    .context("Failed to create qBittorrent engine")?,
            )
        }
        EngineBackend::Librqbit => {
            info!(
                "Initializing embedded librqbit engine (download path: {})",
                config.engine.librqbit.download_path
            );
            Arc::new(
                LibrqbitEngine::new(&config.engine.librqbit)
                    .await
                    .context("Failed to initialize librqbit engine")?,
            )
        }
    };

    let extractor = Arc::new(
        YtDlpExtractor::new(config.extractor.clone()).context("Failed to create extractor")?,
    );

    let transcoder: Arc<dyn Transcoder> = match config.transcoder.backend {
        TranscoderBackend::Ffmpeg => {
            info!("Using in-process ffmpeg transcoder");
            Arc::new(FfmpegTranscoder::new(
                config.transcoder.ffmpeg.clone(),
                config.storage.converted_dir(),
            ))
        }
        TranscoderBackend::Http => {
            info!("Using remote transcoder at {}", config.transcoder.http.base_url);
            Arc::new(
                HttpTranscoder::new(&config.transcoder.http)
                    .context("Failed to create transcoder client")?,
            )
        }
    };

    Ok(Collaborators {
        engine,
        extractor,
        transcoder,
    })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
