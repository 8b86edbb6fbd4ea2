//! Script-to-video worker binary.
//!
//! Usage: `reel-worker <script.txt>...`. All scripts run as one batch.

use std::path::Path;
use std::sync::Arc;

use reel_models::{BatchState, PipelineConfig, ScriptInput};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*};

use reel_worker::{
    logging, metrics, BatchControl, BatchRunner, LogSink, MemoryBatchStore, MemoryJobStore,
    PipelineOrchestrator, PipelineServices, WorkerConfig,
};

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = logging::env_filter()?;

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn load_override(path: &Path) -> anyhow::Result<serde_json::Value> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn load_scripts(paths: &[String]) -> anyhow::Result<Vec<ScriptInput>> {
    let mut scripts = Vec::with_capacity(paths.len());
    for path in paths {
        let text = tokio::fs::read_to_string(path).await?;
        let title = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        scripts.push(ScriptInput::new(text).with_title(title));
    }
    Ok(scripts)
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        eprintln!("rustls crypto provider was already installed");
    }

    dotenvy::dotenv().ok();

    if let Err(e) = init_tracing() {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        error!("Usage: reel-worker <script.txt>...");
        std::process::exit(1);
    }

    info!("Starting reel-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    let missing = config.missing_keys();
    if !missing.is_empty() {
        warn!("Missing API keys: {}", missing.join(", "));
    }

    let pipeline = match &config.pipeline_config_path {
        Some(path) => match PipelineConfig::from_json_file(path) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to load pipeline config {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let prometheus = match metrics::init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Metrics disabled: {}", e);
            None
        }
    };

    let scripts = match load_scripts(&paths).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to read scripts: {}", e);
            std::process::exit(1);
        }
    };

    let overrides = match &config.batch_override_path {
        Some(path) => match load_override(path).await {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Failed to read batch override {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => None,
    };

    let services = PipelineServices::from_worker_config(&config);
    let orchestrator = PipelineOrchestrator::new(
        pipeline,
        &config,
        services,
        Arc::new(MemoryJobStore::new(config.job_store_capacity)),
    )
    .with_sink(Arc::new(LogSink));

    let runner = BatchRunner::new(
        Arc::new(orchestrator),
        Arc::new(MemoryBatchStore::new(config.batch_store_capacity)),
    )
    .with_sink(Arc::new(LogSink))
    .with_poll_interval(config.batch_poll_interval);

    // Ctrl-C stops the batch at the next item boundary
    let control = BatchControl::new();
    let signal_control = control.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal, cancelling after the current item");
        signal_control.cancel();
    });

    let batch_id = uuid::Uuid::new_v4().simple().to_string();
    let status = runner
        .run_with_overrides(&batch_id, "cli", scripts, overrides.as_ref(), control)
        .await;

    for item in &status.items {
        match (&item.video_path, &item.error) {
            (Some(path), _) => info!(item = %item.title, "Video: {}", path.display()),
            (None, Some(e)) => warn!(item = %item.title, "Failed: {}", e),
            (None, None) => info!(item = %item.title, "{}", item.status.as_str()),
        }
    }

    if let Some(handle) = prometheus {
        let path = config.output_dir.join("metrics.prom");
        if let Err(e) = tokio::fs::write(&path, handle.render()).await {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    info!(
        batch_id = %status.batch_id,
        status = status.status.as_str(),
        completed = status.completed_items,
        failed = status.failed_items,
        "Worker shutdown complete"
    );

    if status.status == BatchState::Failed {
        std::process::exit(1);
    }
}
