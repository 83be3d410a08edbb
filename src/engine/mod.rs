mod availability;
mod error;
mod exchange;
mod roster;
mod rotation;
mod selection;
mod store;

pub use error::EngineError;
pub use rotation::is_permutation;

use store::Ledger;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::audit::{AuditEvent, AuditSink};
use crate::config::EngineConfig;
use crate::limits::*;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::*;
use crate::wal::Wal;

/// Actor recorded for changes made by the process itself (e.g. seeding).
pub const SYSTEM_ACTOR: Ulid = Ulid(0);

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn validate_year(year: Year) -> Result<(), EngineError> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(EngineError::LimitExceeded("year out of range"));
    }
    Ok(())
}

pub(crate) fn validate_len(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Exclusive ledger access held by one transaction.
pub(super) type LedgerGuard = OwnedRwLockWriteGuard<Ledger>;

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it (the batch window).
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }

        metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// Write event to WAL via the background group-commit writer.
async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
        .send(WalCommand::Append {
            event: event.clone(),
            response: tx,
        })
        .await
        .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
    rx.await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The selection engine: ledger + WAL + sinks.
///
/// Every mutation is one transaction: take the ledger write lock, re-check
/// preconditions, append ONE event carrying the whole change, apply it.
pub struct Engine {
    ledger: Arc<RwLock<Ledger>>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    audit: Arc<dyn AuditSink>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, audit: Arc<dyn AuditSink>) -> io::Result<Self> {
        Self::with_config(wal_path, notify, audit, EngineConfig::default())
    }

    /// Replay the WAL into a fresh ledger and start the WAL writer.
    /// Must be called inside a tokio runtime.
    pub fn with_config(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        audit: Arc<dyn AuditSink>,
        config: EngineConfig,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let mut ledger = Ledger::new();
        for event in &events {
            ledger.apply(event);
        }
        let active_staff = ledger.active_staff().len();
        tracing::debug!(events = events.len(), active_staff, "ledger replayed");
        metrics::gauge!(ACTIVE_STAFF).set(active_staff as f64);

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            ledger: Arc::new(RwLock::new(ledger)),
            wal_tx,
            notify,
            audit,
            config,
        })
    }

    /// Take the ledger lock for a transaction, or `ConflictRetry` on timeout.
    pub(super) async fn write_ledger(&self) -> Result<LedgerGuard, EngineError> {
        tokio::time::timeout(self.config.lock_timeout, self.ledger.clone().write_owned())
            .await
            .map_err(|_| EngineError::ConflictRetry)
    }

    /// Durably append `event`, then apply it, and hand the lock back.
    /// Nothing is applied if the append fails.
    ///
    /// Append and apply run in their own task that owns the guard. A caller
    /// dropped mid-commit cannot leave an event on disk that memory lacks.
    pub(super) async fn commit(&self, mut ledger: LedgerGuard, event: Event) -> Result<LedgerGuard, EngineError> {
        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            ledger.apply(&event);
            Ok::<_, EngineError>(ledger)
        })
        .await
        .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Run a transaction, absorbing up to `max_retries` ConflictRetry failures.
    pub(super) async fn run_op<T, F, Fut>(&self, op: &'static str, mut attempt_op: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EngineError>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        let result = loop {
            match attempt_op().await {
                Err(EngineError::ConflictRetry) if attempt < self.config.max_retries => {
                    attempt += 1;
                    metrics::counter!(CONFLICT_RETRIES_TOTAL, "op" => op).increment(1);
                    tracing::warn!(op, attempt, "ledger lock contended, retrying");
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                }
                other => break other,
            }
        };
        if let Err(e) = &result {
            if e.is_business() {
                tracing::debug!(op, error = %e, "rejected");
            } else {
                tracing::error!(op, error = %e, "operation failed");
            }
        }
        metrics::counter!(OPERATIONS_TOTAL, "op" => op, "status" => status_label(&result)).increment(1);
        metrics::histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(start.elapsed().as_secs_f64());
        result
    }

    /// Hand an event to the audit sink. Runs after commit; failures only log.
    pub(super) fn emit_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.record(&event) {
            metrics::counter!(AUDIT_FAILURES_TOTAL).increment(1);
            tracing::warn!(action = ?event.action, error = %e, "audit sink failed");
        }
    }

    pub(super) fn record_staff_gauge(ledger: &Ledger) {
        metrics::gauge!(ACTIVE_STAFF).set(ledger.active_staff().len() as f64);
    }

    /// Rewrite the WAL as a single snapshot of the current ledger.
    /// Holds the ledger lock throughout so no commit lands between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let ledger = self.ledger.write().await;
        let events = vec![Event::Snapshot(Box::new(ledger.snapshot()))];

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(ledger);
        if result.is_ok() {
            metrics::counter!(WAL_COMPACTIONS_TOTAL).increment(1);
        }
        result
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Point-in-time copy of the whole ledger.
    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.ledger.read().await.snapshot()
    }
}
