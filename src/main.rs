use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use shiftpick::audit::{AuditSink, JsonlAuditSink, TracingAuditSink};
use shiftpick::config::Config;
use shiftpick::engine::Engine;
use shiftpick::notify::NotifyHub;
use shiftpick::{compactor, seed};

const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    shiftpick::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;

    let audit: Arc<dyn AuditSink> = match &config.audit_log {
        Some(path) => Arc::new(JsonlAuditSink::open(path)?),
        None => Arc::new(TracingAuditSink),
    };
    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::with_config(
        config.wal_path(),
        notify,
        audit,
        config.engine.clone(),
    )?);

    if let Some(path) = &config.seed_file {
        let doc = seed::load(path)?;
        seed::apply(&engine, &doc).await?;
    }

    let compactor_engine = engine.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_engine, threshold, COMPACT_CHECK_PERIOD).await;
    });

    info!("shiftpick started");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  audit: {}", config.audit_log.as_ref().map_or("tracing".to_string(), |p| p.display().to_string()));
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));
    for entry in engine.queue().await {
        info!(priority = entry.priority, employee = %entry.employee_id, name = %entry.name, "queue");
    }

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    info!("shutdown signal received");
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!(error = %e, "final compaction failed");
    }
    info!("shiftpick stopped");
    Ok(())
}
