//! Initial roster and catalog, loaded from a JSON document on first start.
//!
//! ```json
//! {
//!   "employees": [{ "name": "Ana", "email": "ana@example.com", "role": "staff" }],
//!   "services": [{
//!     "name": "Service 1",
//!     "days": [{ "date": "2024-01-06", "period": "morning", "shift_code": "M6" }]
//!   }]
//! }
//! ```
//!
//! Staff priorities follow document order.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{error, info};

use crate::engine::{Engine, EngineError, SYSTEM_ACTOR};
use crate::limits::*;
use crate::model::{Role, ShiftPeriod};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedEmployee {
    pub name: String,
    pub email: String,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::Staff
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedDay {
    pub date: NaiveDate,
    pub period: ShiftPeriod,
    pub shift_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub days: Vec<SeedDay>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedDocument {
    #[serde(default)]
    pub employees: Vec<SeedEmployee>,
    #[serde(default)]
    pub services: Vec<SeedService>,
}

#[derive(Debug)]
pub enum SeedError {
    Io(io::Error),
    Parse(serde_json::Error),
    /// The document would be rejected part way through; nothing was applied.
    Invalid(String),
    Engine(EngineError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(e) => write!(f, "seed io: {e}"),
            SeedError::Parse(e) => write!(f, "seed parse: {e}"),
            SeedError::Invalid(msg) => write!(f, "invalid seed: {msg}"),
            SeedError::Engine(e) => write!(f, "seed apply: {e}"),
        }
    }
}

impl std::error::Error for SeedError {}

impl From<io::Error> for SeedError {
    fn from(e: io::Error) -> Self {
        SeedError::Io(e)
    }
}

impl From<serde_json::Error> for SeedError {
    fn from(e: serde_json::Error) -> Self {
        SeedError::Parse(e)
    }
}

impl From<EngineError> for SeedError {
    fn from(e: EngineError) -> Self {
        SeedError::Engine(e)
    }
}

fn check_len(value: &str, max: usize, what: &str) -> Result<(), SeedError> {
    if value.len() > max {
        return Err(SeedError::Invalid(format!("{what} too long: {value:.32}")));
    }
    Ok(())
}

impl SeedDocument {
    /// Everything the roster operations would reject, checked up front.
    pub fn validate(&self) -> Result<(), SeedError> {
        if self.employees.len() > MAX_EMPLOYEES {
            return Err(SeedError::Invalid("too many employees".into()));
        }
        if self.services.len() > MAX_SERVICES {
            return Err(SeedError::Invalid("too many services".into()));
        }
        let mut emails = HashSet::new();
        for e in &self.employees {
            check_len(&e.name, MAX_NAME_LEN, "employee name")?;
            check_len(&e.email, MAX_NAME_LEN, "employee email")?;
            if !emails.insert(e.email.to_ascii_lowercase()) {
                return Err(SeedError::Invalid(format!("duplicate email {}", e.email)));
            }
        }
        for s in &self.services {
            check_len(&s.name, MAX_NAME_LEN, "service name")?;
            check_len(&s.description, MAX_DESCRIPTION_LEN, "service description")?;
            if s.days.len() > MAX_DAYS_PER_SERVICE {
                return Err(SeedError::Invalid(format!("too many days in service {}", s.name)));
            }
            let mut slots = HashSet::new();
            for d in &s.days {
                check_len(&d.shift_code, MAX_SHIFT_CODE_LEN, "shift code")?;
                if !slots.insert((d.date, d.period)) {
                    return Err(SeedError::Invalid(format!(
                        "duplicate day {} {} in service {}",
                        d.date, d.period, s.name
                    )));
                }
            }
        }
        Ok(())
    }
}

pub fn load(path: &Path) -> Result<SeedDocument, SeedError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Apply `doc` through the normal roster operations. Skipped (returns false)
/// when the engine already has employees. The document is validated first,
/// so a bad seed leaves the engine empty.
pub async fn apply(engine: &Engine, doc: &SeedDocument) -> Result<bool, SeedError> {
    if !engine.employees().await.is_empty() {
        info!("roster not empty, seed skipped");
        return Ok(false);
    }
    doc.validate()?;
    let mut employees = 0usize;
    let mut services = 0usize;
    let mut days = 0usize;
    if let Err(e) = apply_all(engine, doc, &mut employees, &mut services, &mut days).await {
        error!(
            error = %e,
            employees,
            services,
            days,
            "seed failed part way; partial roster is kept and later starts will skip the seed"
        );
        return Err(e.into());
    }
    info!(employees, services, days, "seed applied");
    Ok(true)
}

async fn apply_all(
    engine: &Engine,
    doc: &SeedDocument,
    employees: &mut usize,
    services: &mut usize,
    days: &mut usize,
) -> Result<(), EngineError> {
    for e in &doc.employees {
        engine
            .register_employee(SYSTEM_ACTOR, &e.name, &e.email, e.role)
            .await?;
        *employees += 1;
    }
    for s in &doc.services {
        let service = engine
            .create_service(SYSTEM_ACTOR, &s.name, &s.description)
            .await?;
        *services += 1;
        for d in &s.days {
            engine
                .add_service_day(SYSTEM_ACTOR, service.id, d.date, d.period, &d.shift_code)
                .await?;
            *days += 1;
        }
    }
    Ok(())
}
