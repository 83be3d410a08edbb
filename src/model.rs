use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the timestamp type for every record.
pub type Ms = i64;

/// Selection year (e.g. 2024).
pub type Year = i32;

/// Full priority assignment for active staff: `(employee, rank)`.
/// Ranks always form the permutation `1..=N`.
pub type Ranking = Vec<(Ulid, u32)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Staff,
}

/// Period of the day a shift covers. Ordering follows the working day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftPeriod {
    Morning,
    Afternoon,
    Night,
}

impl fmt::Display for ShiftPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShiftPeriod::Morning => write!(f, "morning"),
            ShiftPeriod::Afternoon => write!(f, "afternoon"),
            ShiftPeriod::Night => write!(f, "night"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub active: bool,
    /// Queue position; `None` for admins and inactive employees.
    pub priority: Option<u32>,
    pub created_at: Ms,
}

impl Employee {
    pub fn is_active_staff(&self) -> bool {
        self.active && self.role == Role::Staff
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub created_at: Ms,
}

/// One `(date, period, shift code)` slot of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDay {
    pub id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub period: ShiftPeriod,
    pub shift_code: String,
}

impl ServiceDay {
    pub fn slot(&self) -> (NaiveDate, ShiftPeriod) {
        (self.date, self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub service_id: Ulid,
    pub year: Year,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExceptionKind {
    /// Employee no longer works the slot.
    Leave,
    /// Employee now works the slot.
    Adjustment,
    Substitution,
    Vacation,
}

impl ExceptionKind {
    /// The kind a new record cancels when the same employee hits the same slot.
    pub fn opposite(self) -> Option<ExceptionKind> {
        match self {
            ExceptionKind::Leave => Some(ExceptionKind::Adjustment),
            ExceptionKind::Adjustment => Some(ExceptionKind::Leave),
            ExceptionKind::Substitution | ExceptionKind::Vacation => None,
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Leave => write!(f, "leave"),
            ExceptionKind::Adjustment => write!(f, "adjustment"),
            ExceptionKind::Substitution => write!(f, "substitution"),
            ExceptionKind::Vacation => write!(f, "vacation"),
        }
    }
}

/// Day-level overlay record. Never rewrites the underlying [`ServiceDay`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayException {
    pub id: Ulid,
    pub employee_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub period: ShiftPeriod,
    pub kind: ExceptionKind,
    pub reason: String,
    pub active: bool,
    pub created_by: Ulid,
    pub created_at: Ms,
}

impl DayException {
    pub fn covers(&self, service_id: Ulid, date: NaiveDate, period: ShiftPeriod) -> bool {
        self.service_id == service_id && self.date == date && self.period == period
    }
}

/// Whole-ledger image written by WAL compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub employees: Vec<Employee>,
    pub services: Vec<Service>,
    pub days: Vec<ServiceDay>,
    pub selections: Vec<Selection>,
    pub exceptions: Vec<DayException>,
}

/// The event types — one per committed transaction. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    EmployeeRegistered {
        employee: Employee,
    },
    EmployeeDeactivated {
        id: Ulid,
        ranking: Ranking,
    },
    EmployeeRoleChanged {
        id: Ulid,
        role: Role,
        ranking: Ranking,
    },
    RankingRewritten {
        ranking: Ranking,
    },
    ServiceCreated {
        service: Service,
    },
    ServiceDeactivated {
        id: Ulid,
    },
    ServiceDayAdded {
        day: ServiceDay,
    },
    SelectionClaimed {
        selection: Selection,
        ranking: Ranking,
    },
    SelectionReleased {
        id: Ulid,
        ranking: Ranking,
    },
    SelectionDeleted {
        id: Ulid,
    },
    ExceptionRecorded {
        exception: DayException,
        cancels: Vec<Ulid>,
    },
    ExceptionRevoked {
        id: Ulid,
    },
    DayExchanged {
        leave: DayException,
        adjustment: DayException,
        cancels: Vec<Ulid>,
    },
    Snapshot(Box<LedgerSnapshot>),
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceAvailability {
    pub service: Service,
    pub total_day_slots: usize,
    pub free_day_slots: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub total_selections: usize,
    pub distinct_services_selected: usize,
    pub distinct_employees_with_selection: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SelectionProgress {
    pub total_staff: usize,
    pub staff_with_selection: usize,
    /// Rounded percentage, 0 when there is no active staff.
    pub percent: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEntry {
    pub date: NaiveDate,
    pub period: ShiftPeriod,
    pub shift_code: String,
    pub service_id: Ulid,
    pub service_name: String,
    pub holder: Option<QueueEntry>,
}

/// Employee as seen in the claim queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub employee_id: Ulid,
    pub name: String,
    pub priority: Option<u32>,
}

impl From<&Employee> for QueueEntry {
    fn from(e: &Employee) -> Self {
        Self {
            employee_id: e.id,
            name: e.name.clone(),
            priority: e.priority,
        }
    }
}

/// Result of a day exchange: the two day ids acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExchangeOutcome {
    pub released: Ulid,
    pub taken: Ulid,
}

/// True if `date` falls in `year` and, when given, `month` (1-12).
pub fn in_period(date: NaiveDate, year: Year, month: Option<u32>) -> bool {
    date.year() == year && month.is_none_or(|m| date.month() == m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn period_ordering_follows_working_day() {
        let mut periods = vec![ShiftPeriod::Night, ShiftPeriod::Morning, ShiftPeriod::Afternoon];
        periods.sort();
        assert_eq!(
            periods,
            vec![ShiftPeriod::Morning, ShiftPeriod::Afternoon, ShiftPeriod::Night]
        );
    }

    #[test]
    fn only_leave_and_adjustment_cancel() {
        assert_eq!(ExceptionKind::Leave.opposite(), Some(ExceptionKind::Adjustment));
        assert_eq!(ExceptionKind::Adjustment.opposite(), Some(ExceptionKind::Leave));
        assert_eq!(ExceptionKind::Vacation.opposite(), None);
        assert_eq!(ExceptionKind::Substitution.opposite(), None);
    }

    #[test]
    fn active_staff_excludes_admins_and_inactive() {
        let mut e = Employee {
            id: Ulid::new(),
            name: "Ana".into(),
            email: "ana@example.com".into(),
            role: Role::Staff,
            active: true,
            priority: Some(1),
            created_at: 0,
        };
        assert!(e.is_active_staff());
        e.active = false;
        assert!(!e.is_active_staff());
        e.active = true;
        e.role = Role::Admin;
        assert!(!e.is_active_staff());
    }

    #[test]
    fn in_period_filters_year_and_month() {
        assert!(in_period(day(2024, 3, 1), 2024, None));
        assert!(in_period(day(2024, 3, 1), 2024, Some(3)));
        assert!(!in_period(day(2024, 3, 1), 2024, Some(4)));
        assert!(!in_period(day(2023, 3, 1), 2024, None));
    }

    #[test]
    fn exception_covers_exact_slot() {
        let sid = Ulid::new();
        let exc = DayException {
            id: Ulid::new(),
            employee_id: Ulid::new(),
            service_id: sid,
            date: day(2024, 1, 2),
            period: ShiftPeriod::Night,
            kind: ExceptionKind::Leave,
            reason: String::new(),
            active: true,
            created_by: Ulid::new(),
            created_at: 0,
        };
        assert!(exc.covers(sid, day(2024, 1, 2), ShiftPeriod::Night));
        assert!(!exc.covers(sid, day(2024, 1, 2), ShiftPeriod::Morning));
        assert!(!exc.covers(Ulid::new(), day(2024, 1, 2), ShiftPeriod::Night));
    }
}
