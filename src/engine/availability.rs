use crate::model::*;

use super::store::Ledger;
use super::Engine;

/// Unclaimed active services for `year` with total and exception-free slot counts.
pub(super) fn services_available(ledger: &Ledger, year: Year) -> Vec<ServiceAvailability> {
    let mut out: Vec<ServiceAvailability> = ledger
        .services()
        .filter(|s| s.active && ledger.selection_of_service(s.id, year).is_none())
        .map(|s| {
            let days = ledger.days_of(&s.id);
            let free = days.iter().filter(|d| ledger.slot_is_free(d)).count();
            ServiceAvailability {
                service: s.clone(),
                total_day_slots: days.len(),
                free_day_slots: free,
            }
        })
        .collect();
    out.sort_by(|a, b| a.service.name.cmp(&b.service.name).then(a.service.id.cmp(&b.service.id)));
    out
}

/// Every service day in `year` (and `month`), with who holds it.
pub(super) fn calendar(ledger: &Ledger, year: Year, month: Option<u32>) -> Vec<CalendarEntry> {
    let mut entries: Vec<CalendarEntry> = ledger
        .days()
        .filter(|d| in_period(d.date, year, month))
        .filter_map(|d| {
            let service = ledger.service(&d.service_id)?;
            let holder = ledger
                .selection_of_service(d.service_id, year)
                .and_then(|sel| ledger.employee(&sel.employee_id))
                .map(QueueEntry::from);
            Some(CalendarEntry {
                date: d.date,
                period: d.period,
                shift_code: d.shift_code.clone(),
                service_id: service.id,
                service_name: service.name.clone(),
                holder,
            })
        })
        .collect();
    entries.sort_by(|a, b| {
        (a.date, a.period, &a.service_name, a.service_id).cmp(&(b.date, b.period, &b.service_name, b.service_id))
    });
    entries
}

impl Engine {
    /// Read-only projection; always computed from the ledger at call time.
    pub async fn services_available(&self, year: Year) -> Vec<ServiceAvailability> {
        let ledger = self.ledger.read().await;
        services_available(&ledger, year)
    }

    pub async fn calendar(&self, year: Year, month: Option<u32>) -> Vec<CalendarEntry> {
        let ledger = self.ledger.read().await;
        calendar(&ledger, year, month)
    }
}
