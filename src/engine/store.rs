use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// In-memory state rebuilt from the WAL. Mutated only through [`Ledger::apply`].
#[derive(Debug, Default)]
pub struct Ledger {
    employees: HashMap<Ulid, Employee>,
    services: HashMap<Ulid, Service>,
    days: HashMap<Ulid, ServiceDay>,
    /// service → day ids, sorted by `(date, period)`.
    days_by_service: HashMap<Ulid, Vec<Ulid>>,
    selections: HashMap<Ulid, Selection>,
    by_employee_year: HashMap<(Ulid, Year), Ulid>,
    by_service_year: HashMap<(Ulid, Year), Ulid>,
    /// Append-only overlay log; `active` is the only field that ever changes.
    exceptions: Vec<DayException>,
    exception_index: HashMap<Ulid, usize>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Employees ────────────────────────────────────────────

    pub fn employee(&self, id: &Ulid) -> Option<&Employee> {
        self.employees.get(id)
    }

    pub fn employees(&self) -> impl Iterator<Item = &Employee> {
        self.employees.values()
    }

    pub fn employee_count(&self) -> usize {
        self.employees.len()
    }

    /// Active staff ordered by current priority (the claim queue).
    pub fn active_staff(&self) -> Vec<&Employee> {
        let mut staff: Vec<&Employee> = self
            .employees
            .values()
            .filter(|e| e.is_active_staff())
            .collect();
        staff.sort_by_key(|e| (e.priority.unwrap_or(u32::MAX), e.id));
        staff
    }

    // ── Services & days ──────────────────────────────────────

    pub fn service(&self, id: &Ulid) -> Option<&Service> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn day(&self, id: &Ulid) -> Option<&ServiceDay> {
        self.days.get(id)
    }

    pub fn days(&self) -> impl Iterator<Item = &ServiceDay> {
        self.days.values()
    }

    /// Days of a service in `(date, period)` order.
    pub fn days_of(&self, service_id: &Ulid) -> Vec<&ServiceDay> {
        self.days_by_service
            .get(service_id)
            .map(|ids| ids.iter().filter_map(|id| self.days.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn first_day(&self, service_id: &Ulid) -> Option<&ServiceDay> {
        self.days_by_service
            .get(service_id)
            .and_then(|ids| ids.first())
            .and_then(|id| self.days.get(id))
    }

    pub fn has_slot(&self, service_id: &Ulid, date: NaiveDate, period: ShiftPeriod) -> bool {
        self.days_of(service_id)
            .iter()
            .any(|d| d.slot() == (date, period))
    }

    // ── Selections ───────────────────────────────────────────

    pub fn selection(&self, id: &Ulid) -> Option<&Selection> {
        self.selections.get(id)
    }

    pub fn selection_for(&self, employee_id: Ulid, year: Year) -> Option<&Selection> {
        self.by_employee_year
            .get(&(employee_id, year))
            .and_then(|id| self.selections.get(id))
    }

    pub fn selection_of_service(&self, service_id: Ulid, year: Year) -> Option<&Selection> {
        self.by_service_year
            .get(&(service_id, year))
            .and_then(|id| self.selections.get(id))
    }

    /// Every selection matching `filter`, oldest first.
    pub fn selections_where(&self, filter: impl Fn(&Selection) -> bool) -> Vec<Selection> {
        let mut out: Vec<Selection> = self
            .selections
            .values()
            .filter(|s| filter(s))
            .cloned()
            .collect();
        out.sort_by_key(|s| (s.created_at, s.id));
        out
    }

    // ── Exceptions ───────────────────────────────────────────

    pub fn exception(&self, id: &Ulid) -> Option<&DayException> {
        self.exception_index.get(id).map(|&i| &self.exceptions[i])
    }

    pub fn exceptions(&self) -> &[DayException] {
        &self.exceptions
    }

    pub fn active_exceptions_at(
        &self,
        service_id: Ulid,
        date: NaiveDate,
        period: ShiftPeriod,
    ) -> impl Iterator<Item = &DayException> {
        self.exceptions
            .iter()
            .filter(move |e| e.active && e.covers(service_id, date, period))
    }

    pub fn slot_is_free(&self, day: &ServiceDay) -> bool {
        self.active_exceptions_at(day.service_id, day.date, day.period)
            .next()
            .is_none()
    }

    /// The active record a new exception would cancel: same employee, same
    /// slot, opposite kind. Latest first.
    pub fn cancellable_by(&self, new: &DayException) -> Option<Ulid> {
        let opposite = new.kind.opposite()?;
        self.active_exceptions_at(new.service_id, new.date, new.period)
            .filter(|e| e.employee_id == new.employee_id && e.kind == opposite)
            .last()
            .map(|e| e.id)
    }

    // ── Event application ────────────────────────────────────

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::EmployeeRegistered { employee } => {
                self.employees.insert(employee.id, employee.clone());
            }
            Event::EmployeeDeactivated { id, ranking } => {
                if let Some(e) = self.employees.get_mut(id) {
                    e.active = false;
                }
                self.apply_ranking(ranking);
            }
            Event::EmployeeRoleChanged { id, role, ranking } => {
                if let Some(e) = self.employees.get_mut(id) {
                    e.role = *role;
                }
                self.apply_ranking(ranking);
            }
            Event::RankingRewritten { ranking } => self.apply_ranking(ranking),
            Event::ServiceCreated { service } => {
                self.services.insert(service.id, service.clone());
            }
            Event::ServiceDeactivated { id } => {
                if let Some(s) = self.services.get_mut(id) {
                    s.active = false;
                }
            }
            Event::ServiceDayAdded { day } => self.insert_day(day.clone()),
            Event::SelectionClaimed { selection, ranking } => {
                self.insert_selection(selection.clone());
                self.apply_ranking(ranking);
            }
            Event::SelectionReleased { id, ranking } => {
                self.remove_selection(id);
                self.apply_ranking(ranking);
            }
            Event::SelectionDeleted { id } => {
                self.remove_selection(id);
            }
            Event::ExceptionRecorded { exception, cancels } => {
                self.push_exception(exception.clone());
                self.deactivate_exceptions(cancels);
            }
            Event::ExceptionRevoked { id } => self.deactivate_exceptions(std::slice::from_ref(id)),
            Event::DayExchanged {
                leave,
                adjustment,
                cancels,
            } => {
                self.push_exception(leave.clone());
                self.push_exception(adjustment.clone());
                self.deactivate_exceptions(cancels);
            }
            Event::Snapshot(snapshot) => self.restore(snapshot),
        }
    }

    /// Install a complete ranking: listed employees get their rank, everyone
    /// else loses theirs. Never leaves a partial permutation behind.
    fn apply_ranking(&mut self, ranking: &Ranking) {
        for e in self.employees.values_mut() {
            e.priority = None;
        }
        for (id, rank) in ranking {
            if let Some(e) = self.employees.get_mut(id) {
                e.priority = Some(*rank);
            }
        }
    }

    fn insert_day(&mut self, day: ServiceDay) {
        let ids = self.days_by_service.entry(day.service_id).or_default();
        let days = &self.days;
        let pos = ids.partition_point(|id| days.get(id).is_some_and(|d| d.slot() < day.slot()));
        ids.insert(pos, day.id);
        self.days.insert(day.id, day);
    }

    fn insert_selection(&mut self, selection: Selection) {
        self.by_employee_year
            .insert((selection.employee_id, selection.year), selection.id);
        self.by_service_year
            .insert((selection.service_id, selection.year), selection.id);
        self.selections.insert(selection.id, selection);
    }

    fn remove_selection(&mut self, id: &Ulid) -> Option<Selection> {
        let selection = self.selections.remove(id)?;
        self.by_employee_year
            .remove(&(selection.employee_id, selection.year));
        self.by_service_year
            .remove(&(selection.service_id, selection.year));
        Some(selection)
    }

    fn push_exception(&mut self, exception: DayException) {
        self.exception_index.insert(exception.id, self.exceptions.len());
        self.exceptions.push(exception);
    }

    fn deactivate_exceptions(&mut self, ids: &[Ulid]) {
        for id in ids {
            if let Some(&i) = self.exception_index.get(id) {
                self.exceptions[i].active = false;
            }
        }
    }

    // ── Snapshots ────────────────────────────────────────────

    pub fn snapshot(&self) -> LedgerSnapshot {
        let mut employees: Vec<Employee> = self.employees.values().cloned().collect();
        employees.sort_by_key(|e| e.id);
        let mut services: Vec<Service> = self.services.values().cloned().collect();
        services.sort_by_key(|s| s.id);
        let mut days: Vec<ServiceDay> = self.days.values().cloned().collect();
        days.sort_by_key(|d| (d.service_id, d.date, d.period));
        LedgerSnapshot {
            employees,
            services,
            days,
            selections: self.selections_where(|_| true),
            exceptions: self.exceptions.clone(),
        }
    }

    fn restore(&mut self, snapshot: &LedgerSnapshot) {
        *self = Ledger::new();
        for e in &snapshot.employees {
            self.employees.insert(e.id, e.clone());
        }
        for s in &snapshot.services {
            self.services.insert(s.id, s.clone());
        }
        for d in &snapshot.days {
            self.insert_day(d.clone());
        }
        for s in &snapshot.selections {
            self.insert_selection(s.clone());
        }
        for x in &snapshot.exceptions {
            self.push_exception(x.clone());
        }
    }
}
