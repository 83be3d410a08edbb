use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine operations. Labels: op, status.
pub const OPERATIONS_TOTAL: &str = "shiftpick_operations_total";

/// Histogram: operation latency in seconds, retries included. Labels: op.
pub const OPERATION_DURATION_SECONDS: &str = "shiftpick_operation_duration_seconds";

/// Counter: ConflictRetry attempts absorbed by the engine. Labels: op.
pub const CONFLICT_RETRIES_TOTAL: &str = "shiftpick_conflict_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active staff in the claim queue.
pub const ACTIVE_STAFF: &str = "shiftpick_active_staff";

/// Counter: audit sink failures.
pub const AUDIT_FAILURES_TOTAL: &str = "shiftpick_audit_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "shiftpick_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "shiftpick_wal_flush_batch_size";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "shiftpick_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Status label for an operation result.
pub fn status_label<T>(result: &Result<T, crate::engine::EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}
