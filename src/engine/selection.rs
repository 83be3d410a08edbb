use std::collections::HashSet;

use serde_json::{json, Value};
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent};
use crate::model::*;
use crate::notify::ClaimCompleted;

use super::rotation::{can_claim, current_ranking, rotated_ranking};
use super::{now_ms, validate_year, Engine, EngineError};

impl Engine {
    /// Claim `service_id` for `year`. Availability check, turn check, insert
    /// and the full re-rank happen in one transaction.
    pub async fn claim(&self, employee_id: Ulid, service_id: Ulid, year: Year) -> Result<Selection, EngineError> {
        self.run_op("claim", || self.try_claim(employee_id, service_id, year))
            .await
    }

    async fn try_claim(&self, employee_id: Ulid, service_id: Ulid, year: Year) -> Result<Selection, EngineError> {
        validate_year(year)?;
        let ledger = self.write_ledger().await?;

        let service = ledger
            .service(&service_id)
            .cloned()
            .ok_or(EngineError::NotFound(service_id))?;
        if !service.active || ledger.selection_of_service(service_id, year).is_some() {
            return Err(EngineError::ServiceUnavailable { service_id, year });
        }
        let employee = ledger
            .employee(&employee_id)
            .cloned()
            .ok_or(EngineError::NotFound(employee_id))?;
        if !can_claim(&ledger, employee_id, year) {
            return Err(EngineError::NotYourTurn { employee_id, year });
        }

        let before = current_ranking(&ledger);
        let ranking = rotated_ranking(&ledger, employee_id)?;
        let selection = Selection {
            id: Ulid::new(),
            employee_id,
            service_id,
            year,
            created_at: now_ms(),
        };
        let ledger = self.commit(
            ledger,
            Event::SelectionClaimed {
                selection: selection.clone(),
                ranking: ranking.clone(),
            },
        )
        .await?;
        let first_day = ledger.first_day(&service_id).cloned();
        drop(ledger);

        info!(
            employee = %employee_id,
            service = %service_id,
            year,
            "service claimed"
        );
        self.notify.send(&ClaimCompleted {
            employee_id,
            employee_name: employee.name,
            employee_email: employee.email,
            service_id,
            service_name: service.name.clone(),
            year,
            first_day,
        });
        self.emit_audit(AuditEvent {
            action: AuditAction::SelectionCreated,
            actor: employee_id,
            subjects: vec![selection.id, employee_id, service_id],
            before: json!({ "ranking": before }),
            after: json!({
                "selection": selection,
                "service_name": service.name,
                "ranking": ranking,
            }),
            at: now_ms(),
        });
        Ok(selection)
    }

    /// Give up this year's selection. The employee still goes to the back of
    /// the queue: a release forfeits the turn, it does not restore the old rank.
    pub async fn release(&self, employee_id: Ulid, year: Year) -> Result<Selection, EngineError> {
        self.run_op("release", || self.try_release(employee_id, employee_id, year))
            .await
    }

    /// Administrative release on another employee's behalf. Same rotation as
    /// [`Engine::release`]; permission checks belong to the caller.
    pub async fn force_release(&self, actor: Ulid, employee_id: Ulid, year: Year) -> Result<Selection, EngineError> {
        self.run_op("force_release", || self.try_release(actor, employee_id, year))
            .await
    }

    async fn try_release(&self, actor: Ulid, employee_id: Ulid, year: Year) -> Result<Selection, EngineError> {
        let ledger = self.write_ledger().await?;
        let selection = ledger
            .selection_for(employee_id, year)
            .cloned()
            .ok_or(EngineError::NoSelectionToRelease { employee_id, year })?;

        let before = current_ranking(&ledger);
        let ranking = rotated_ranking(&ledger, employee_id)?;
        let ledger = self.commit(
            ledger,
            Event::SelectionReleased {
                id: selection.id,
                ranking: ranking.clone(),
            },
        )
        .await?;
        drop(ledger);

        info!(
            employee = %employee_id,
            service = %selection.service_id,
            year,
            forced = actor != employee_id,
            "selection released"
        );
        self.emit_audit(AuditEvent {
            action: AuditAction::SelectionReleased,
            actor,
            subjects: vec![selection.id, employee_id, selection.service_id],
            before: json!({ "selection": selection, "ranking": before }),
            after: json!({ "ranking": ranking }),
            at: now_ms(),
        });
        Ok(selection)
    }

    /// Administrative delete by id. Does not rotate priorities.
    /// Returns false if no such selection exists.
    pub async fn delete_selection(&self, actor: Ulid, id: Ulid) -> Result<bool, EngineError> {
        self.run_op("delete_selection", || self.try_delete_selection(actor, id))
            .await
    }

    async fn try_delete_selection(&self, actor: Ulid, id: Ulid) -> Result<bool, EngineError> {
        let ledger = self.write_ledger().await?;
        let Some(selection) = ledger.selection(&id).cloned() else {
            return Ok(false);
        };
        let ledger = self.commit(ledger, Event::SelectionDeleted { id }).await?;
        drop(ledger);

        info!(selection = %id, "selection deleted by administrator");
        self.emit_audit(AuditEvent {
            action: AuditAction::SelectionDeleted,
            actor,
            subjects: vec![id, selection.employee_id, selection.service_id],
            before: json!({ "selection": selection }),
            after: Value::Null,
            at: now_ms(),
        });
        Ok(true)
    }

    pub async fn selection(&self, employee_id: Ulid, year: Year) -> Option<Selection> {
        let ledger = self.ledger.read().await;
        ledger.selection_for(employee_id, year).cloned()
    }

    pub async fn selection_by_id(&self, id: Ulid) -> Option<Selection> {
        let ledger = self.ledger.read().await;
        ledger.selection(&id).cloned()
    }

    /// Selections of one year, oldest first.
    pub async fn selections_by_year(&self, year: Year) -> Vec<Selection> {
        let ledger = self.ledger.read().await;
        ledger.selections_where(|s| s.year == year)
    }

    /// One employee's selections, newest year first.
    pub async fn selections_by_employee(&self, employee_id: Ulid) -> Vec<Selection> {
        let ledger = self.ledger.read().await;
        let mut out = ledger.selections_where(|s| s.employee_id == employee_id);
        out.sort_by(|a, b| b.year.cmp(&a.year).then(a.created_at.cmp(&b.created_at)));
        out
    }

    /// Every selection across all years, oldest first.
    pub async fn all_selections(&self) -> Vec<Selection> {
        let ledger = self.ledger.read().await;
        ledger.selections_where(|_| true)
    }

    pub async fn stats(&self, year: Year) -> SelectionStats {
        let ledger = self.ledger.read().await;
        let selections = ledger.selections_where(|s| s.year == year);
        let services: HashSet<Ulid> = selections.iter().map(|s| s.service_id).collect();
        let employees: HashSet<Ulid> = selections.iter().map(|s| s.employee_id).collect();
        SelectionStats {
            total_selections: selections.len(),
            distinct_services_selected: services.len(),
            distinct_employees_with_selection: employees.len(),
        }
    }

    /// How far the active staff has got through the queue for `year`.
    pub async fn progress(&self, year: Year) -> SelectionProgress {
        let ledger = self.ledger.read().await;
        let staff = ledger.active_staff();
        let done = staff
            .iter()
            .filter(|e| ledger.selection_for(e.id, year).is_some())
            .count();
        let percent = if staff.is_empty() {
            0
        } else {
            ((done as f64 / staff.len() as f64) * 100.0).round() as u32
        };
        SelectionProgress {
            total_staff: staff.len(),
            staff_with_selection: done,
            percent,
        }
    }
}
