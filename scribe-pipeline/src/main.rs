//! scribe-pipeline - Transcription job service
//!
//! Accepts audio uploads, runs each through
//! upload → transcribe → diarize → align on its own task, and serves job
//! status, results and cancellation over HTTP.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use scribe_common::config::{load_toml_config, resolve_config_path};
use scribe_common::events::EventBus;
use scribe_common::logging::init_tracing;
use tokio::signal;
use tracing::{info, warn};

use scribe_pipeline::config::{ModelBackend, PipelineConfig, MODULE_NAME};
use scribe_pipeline::services::{
    Diarizer, RemoteModelClient, SimulatedModels, StageRunner, Transcriber,
};
use scribe_pipeline::store::{JobStore, MemoryJobStore, SqliteJobStore};
use scribe_pipeline::AppState;

/// Command-line arguments for scribe-pipeline
#[derive(Parser, Debug)]
#[command(name = "scribe-pipeline")]
#[command(about = "Transcription and diarization job service")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, env = "SCRIBE_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long)]
    bind: Option<String>,

    /// Folder for uploaded audio
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// SQLite file for durable job records
    #[arg(long)]
    database: Option<PathBuf>,

    /// Model backend: remote or simulated
    #[arg(long)]
    backend: Option<ModelBackend>,

    /// Model server base URL
    #[arg(long)]
    models_url: Option<String>,
}

impl Args {
    fn apply(self, config: &mut PipelineConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(dir) = self.storage_dir {
            config.storage_dir = dir;
        }
        if let Some(path) = self.database {
            config.database_path = Some(path);
        }
        if let Some(backend) = self.backend {
            config.models.backend = backend;
        }
        if let Some(url) = self.models_url {
            config.models.base_url = url;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), "SCRIBE_PIPELINE_CONFIG", MODULE_NAME);
    let mut config: PipelineConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    config.apply_env_overrides();
    args.apply(&mut config);

    init_tracing(&config.logging, "scribe_pipeline").context("Failed to initialize logging")?;

    info!("Starting scribe-pipeline (transcription jobs)");
    info!("Version: {} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"));
    if let Some(path) = &config_path {
        info!("Config: {}", path.display());
    }

    std::fs::create_dir_all(&config.storage_dir).with_context(|| {
        format!("Failed to create storage folder {}", config.storage_dir.display())
    })?;
    info!("Storage: {}", config.storage_dir.display());

    let store: Arc<dyn JobStore> = match &config.database_path {
        Some(path) => {
            info!("Job store: SQLite at {}", path.display());
            let store = SqliteJobStore::connect(path)
                .await
                .context("Failed to open job database")?;
            let interrupted = store
                .fail_interrupted_jobs()
                .await
                .context("Failed to close out interrupted jobs")?;
            if interrupted > 0 {
                warn!("Marked {} interrupted job(s) as failed", interrupted);
            }
            Arc::new(store)
        }
        None => {
            info!("Job store: in-memory");
            Arc::new(MemoryJobStore::new())
        }
    };

    let (transcriber, diarizer): (Arc<dyn Transcriber>, Arc<dyn Diarizer>) =
        match config.models.backend {
            ModelBackend::Remote => {
                info!("Models: remote at {}", config.models.base_url);
                let client = Arc::new(
                    RemoteModelClient::new(&config.models.base_url, config.model_timeout())
                        .context("Failed to build model client")?,
                );
                (client.clone() as Arc<dyn Transcriber>, client as Arc<dyn Diarizer>)
            }
            ModelBackend::Simulated => {
                warn!("Models: simulated backend, transcripts are placeholders");
                let latency = Duration::from_millis(config.models.simulated_latency_ms);
                let models = Arc::new(SimulatedModels::new().with_latency(latency, latency));
                (models.clone() as Arc<dyn Transcriber>, models as Arc<dyn Diarizer>)
            }
        };

    let event_bus = EventBus::new(100);
    let runner = StageRunner::new(
        store,
        transcriber,
        diarizer,
        event_bus.clone(),
        config.runner_settings(),
    );

    let state = AppState::new(runner, event_bus).with_max_upload_bytes(config.max_upload_bytes());
    let app = scribe_pipeline::build_router(state);

    let addr = config.listen_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
