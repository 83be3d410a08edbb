use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use ulid::Ulid;

use crate::model::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    SelectionCreated,
    SelectionReleased,
    SelectionDeleted,
    DayExchanged,
    PrioritiesRotated,
    PriorityOverridden,
    EmployeeRegistered,
    EmployeeDeactivated,
    RoleChanged,
    ServiceCreated,
    ServiceDeactivated,
    ServiceDayAdded,
    ExceptionRecorded,
    ExceptionRevoked,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: Ulid,
    pub subjects: Vec<Ulid>,
    pub before: Value,
    pub after: Value,
    pub at: Ms,
}

#[derive(Debug)]
pub enum AuditError {
    Io(io::Error),
    Encode(serde_json::Error),
    Poisoned,
}

impl std::fmt::Display for AuditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditError::Io(e) => write!(f, "audit io: {e}"),
            AuditError::Encode(e) => write!(f, "audit encode: {e}"),
            AuditError::Poisoned => write!(f, "audit sink lock poisoned"),
        }
    }
}

impl std::error::Error for AuditError {}

impl From<io::Error> for AuditError {
    fn from(e: io::Error) -> Self {
        AuditError::Io(e)
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        AuditError::Encode(e)
    }
}

/// Receives events after commit. A failing sink never undoes the transaction.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Default sink: one structured log line per event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        tracing::info!(
            target: "shiftpick::audit",
            action = ?event.action,
            actor = %event.actor,
            subjects = ?event.subjects,
            before = %event.before,
            after = %event.after,
            at = event.at,
            "audit"
        );
        Ok(())
    }
}

/// Appends one JSON object per line.
pub struct JsonlAuditSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(event)?;
        let mut writer = self.writer.lock().map_err(|_| AuditError::Poisoned)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Keeps events in memory; useful for tests and embedding.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(event.clone());
        Ok(())
    }
}
