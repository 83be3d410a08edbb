use ulid::Ulid;

use crate::model::Year;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Service already claimed for the year.
    ServiceUnavailable { service_id: Ulid, year: Year },
    /// Caller is not the current front-of-queue employee.
    NotYourTurn { employee_id: Ulid, year: Year },
    NoSelectionToRelease { employee_id: Ulid, year: Year },
    NoActiveSelection { employee_id: Ulid, year: Year },
    /// Day-slot does not belong to the caller's claimed service.
    ForeignDay(Ulid),
    /// Day-slot already carries an active exception.
    DayUnavailable(Ulid),
    /// Rotation target is not active staff.
    EmployeeNotEligible(Ulid),
    /// Ledger lock could not be taken in time; retry the whole operation.
    ConflictRetry,
    NotFound(Ulid),
    AlreadyExists(Ulid),
    DuplicateDay {
        service_id: Ulid,
        slot: String,
    },
    InvalidRank {
        rank: u32,
        max: u32,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Business-rule violations, as opposed to storage faults and transient conflicts.
    pub fn is_business(&self) -> bool {
        !matches!(self, EngineError::ConflictRetry | EngineError::WalError(_))
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ServiceUnavailable { .. } => "service_unavailable",
            EngineError::NotYourTurn { .. } => "not_your_turn",
            EngineError::NoSelectionToRelease { .. } => "no_selection_to_release",
            EngineError::NoActiveSelection { .. } => "no_active_selection",
            EngineError::ForeignDay(_) => "foreign_day",
            EngineError::DayUnavailable(_) => "day_unavailable",
            EngineError::EmployeeNotEligible(_) => "employee_not_eligible",
            EngineError::ConflictRetry => "conflict_retry",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::DuplicateDay { .. } => "duplicate_day",
            EngineError::InvalidRank { .. } => "invalid_rank",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::ServiceUnavailable { service_id, year } => {
                write!(f, "service {service_id} already claimed for {year}")
            }
            EngineError::NotYourTurn { employee_id, year } => {
                write!(f, "employee {employee_id} is not next in the {year} queue")
            }
            EngineError::NoSelectionToRelease { employee_id, year } => {
                write!(f, "employee {employee_id} has no {year} selection to release")
            }
            EngineError::NoActiveSelection { employee_id, year } => {
                write!(f, "employee {employee_id} has no {year} selection")
            }
            EngineError::ForeignDay(id) => {
                write!(f, "day {id} does not belong to the selected service")
            }
            EngineError::DayUnavailable(id) => write!(f, "day {id} is not available"),
            EngineError::EmployeeNotEligible(id) => {
                write!(f, "employee {id} is not active staff")
            }
            EngineError::ConflictRetry => write!(f, "transaction conflict, retry"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::DuplicateDay { service_id, slot } => {
                write!(f, "service {service_id} already has a day at {slot}")
            }
            EngineError::InvalidRank { rank, max } => {
                write!(f, "rank {rank} outside 1..={max}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
