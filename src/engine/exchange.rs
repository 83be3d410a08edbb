use chrono::NaiveDate;
use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent};
use crate::limits::MAX_REASON_LEN;
use crate::model::*;

use super::store::Ledger;
use super::{now_ms, validate_len, Engine, EngineError};

const EXCHANGE_REASON: &str = "day exchange";

/// A day of `service_id`, or `ForeignDay`.
fn own_day(ledger: &Ledger, service_id: Ulid, day_id: Ulid) -> Result<ServiceDay, EngineError> {
    ledger
        .day(&day_id)
        .filter(|d| d.service_id == service_id)
        .cloned()
        .ok_or(EngineError::ForeignDay(day_id))
}

/// `(service, date, period)` an overlay record is keyed on.
type Slot = (Ulid, NaiveDate, ShiftPeriod);

fn slot_of(day: &ServiceDay) -> Slot {
    (day.service_id, day.date, day.period)
}

/// Build a new overlay record. If it cancels an earlier opposite record by
/// the same employee on the same slot, both end up inactive.
fn overlay(
    ledger: &Ledger,
    employee_id: Ulid,
    created_by: Ulid,
    (service_id, date, period): Slot,
    kind: ExceptionKind,
    reason: &str,
    cancels: &mut Vec<Ulid>,
) -> DayException {
    let mut exception = DayException {
        id: Ulid::new(),
        employee_id,
        service_id,
        date,
        period,
        kind,
        reason: reason.to_string(),
        active: true,
        created_by,
        created_at: now_ms(),
    };
    if let Some(cancelled) = ledger.cancellable_by(&exception) {
        exception.active = false;
        cancels.push(cancelled);
    }
    exception
}

impl Engine {
    /// Swap one day of the employee's claimed service for another free day of
    /// the same service. Recorded as a `leave` + `adjustment` pair; service
    /// days are never modified. Priority and the selection are untouched.
    pub async fn exchange(
        &self,
        employee_id: Ulid,
        year: Year,
        release_day_id: Ulid,
        take_day_id: Ulid,
    ) -> Result<ExchangeOutcome, EngineError> {
        self.run_op("exchange", || {
            self.try_exchange(employee_id, year, release_day_id, take_day_id)
        })
        .await
    }

    async fn try_exchange(
        &self,
        employee_id: Ulid,
        year: Year,
        release_day_id: Ulid,
        take_day_id: Ulid,
    ) -> Result<ExchangeOutcome, EngineError> {
        let ledger = self.write_ledger().await?;
        let selection = ledger
            .selection_for(employee_id, year)
            .cloned()
            .ok_or(EngineError::NoActiveSelection { employee_id, year })?;

        let release_day = own_day(&ledger, selection.service_id, release_day_id)?;
        let take_day = own_day(&ledger, selection.service_id, take_day_id)?;
        if release_day_id == take_day_id {
            return Err(EngineError::DayUnavailable(take_day_id));
        }
        // The caller's own earlier leave on the target does not block taking it back.
        let blocked = ledger
            .active_exceptions_at(take_day.service_id, take_day.date, take_day.period)
            .any(|e| !(e.employee_id == employee_id && e.kind == ExceptionKind::Leave));
        if blocked {
            return Err(EngineError::DayUnavailable(take_day_id));
        }

        let mut cancels = Vec::new();
        let leave = overlay(
            &ledger,
            employee_id,
            employee_id,
            slot_of(&release_day),
            ExceptionKind::Leave,
            EXCHANGE_REASON,
            &mut cancels,
        );
        let adjustment = overlay(
            &ledger,
            employee_id,
            employee_id,
            slot_of(&take_day),
            ExceptionKind::Adjustment,
            EXCHANGE_REASON,
            &mut cancels,
        );
        let ledger = self.commit(
            ledger,
            Event::DayExchanged {
                leave: leave.clone(),
                adjustment: adjustment.clone(),
                cancels: cancels.clone(),
            },
        )
        .await?;
        drop(ledger);

        info!(
            employee = %employee_id,
            year,
            released = %release_day_id,
            taken = %take_day_id,
            cancelled = cancels.len(),
            "day exchanged"
        );
        self.emit_audit(AuditEvent {
            action: AuditAction::DayExchanged,
            actor: employee_id,
            subjects: vec![selection.id, release_day_id, take_day_id],
            before: json!({ "released_day": release_day, "taken_day": take_day }),
            after: json!({ "leave": leave, "adjustment": adjustment, "cancelled": cancels }),
            at: now_ms(),
        });
        Ok(ExchangeOutcome {
            released: release_day_id,
            taken: take_day_id,
        })
    }

    /// Administrative overlay (vacation, substitution, ...) on one slot of a
    /// service. Counts against availability like an exchange record.
    pub async fn record_exception(
        &self,
        actor: Ulid,
        employee_id: Ulid,
        slot: (Ulid, NaiveDate, ShiftPeriod),
        kind: ExceptionKind,
        reason: &str,
    ) -> Result<DayException, EngineError> {
        validate_len(reason, MAX_REASON_LEN, "reason too long")?;
        self.run_op("record_exception", || {
            self.try_record_exception(actor, employee_id, slot, kind, reason)
        })
        .await
    }

    async fn try_record_exception(
        &self,
        actor: Ulid,
        employee_id: Ulid,
        slot: Slot,
        kind: ExceptionKind,
        reason: &str,
    ) -> Result<DayException, EngineError> {
        let ledger = self.write_ledger().await?;
        if ledger.employee(&employee_id).is_none() {
            return Err(EngineError::NotFound(employee_id));
        }
        let (service_id, _, _) = slot;
        if ledger.service(&service_id).is_none() {
            return Err(EngineError::NotFound(service_id));
        }

        let mut cancels = Vec::new();
        let exception = overlay(&ledger, employee_id, actor, slot, kind, reason, &mut cancels);
        let ledger = self.commit(
            ledger,
            Event::ExceptionRecorded {
                exception: exception.clone(),
                cancels: cancels.clone(),
            },
        )
        .await?;
        drop(ledger);

        info!(
            employee = %employee_id,
            service = %service_id,
            date = %exception.date,
            period = %exception.period,
            %kind,
            "exception recorded"
        );
        self.emit_audit(AuditEvent {
            action: AuditAction::ExceptionRecorded,
            actor,
            subjects: vec![exception.id, employee_id, service_id],
            before: serde_json::Value::Null,
            after: json!({ "exception": exception, "cancelled": cancels }),
            at: now_ms(),
        });
        Ok(exception)
    }

    /// Deactivate an exception. Returns false if it was already inactive.
    pub async fn revoke_exception(&self, actor: Ulid, id: Ulid) -> Result<bool, EngineError> {
        self.run_op("revoke_exception", || self.try_revoke_exception(actor, id))
            .await
    }

    async fn try_revoke_exception(&self, actor: Ulid, id: Ulid) -> Result<bool, EngineError> {
        let ledger = self.write_ledger().await?;
        let exception = ledger
            .exception(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !exception.active {
            return Ok(false);
        }
        let ledger = self.commit(ledger, Event::ExceptionRevoked { id }).await?;
        drop(ledger);

        info!(exception = %id, "exception revoked");
        self.emit_audit(AuditEvent {
            action: AuditAction::ExceptionRevoked,
            actor,
            subjects: vec![id, exception.employee_id, exception.service_id],
            before: json!({ "exception": exception }),
            after: json!({ "active": false }),
            at: now_ms(),
        });
        Ok(true)
    }

    /// Full overlay log of a service, in recording order.
    pub async fn exceptions(&self, service_id: Ulid) -> Vec<DayException> {
        let ledger = self.ledger.read().await;
        ledger
            .exceptions()
            .iter()
            .filter(|e| e.service_id == service_id)
            .cloned()
            .collect()
    }
}
