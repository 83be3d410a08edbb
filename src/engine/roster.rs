use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent};
use crate::limits::*;
use crate::model::*;

use super::rotation::{current_ranking, ranking_with, ranking_without};
use super::{now_ms, validate_len, Engine, EngineError};

impl Engine {
    // ── Employees ────────────────────────────────────────────

    /// Onboard an employee. Staff join the back of the queue at `N+1`.
    /// E-mail addresses are unique (case-insensitive).
    pub async fn register_employee(
        &self,
        actor: Ulid,
        name: &str,
        email: &str,
        role: Role,
    ) -> Result<Employee, EngineError> {
        validate_len(name, MAX_NAME_LEN, "employee name too long")?;
        validate_len(email, MAX_NAME_LEN, "employee email too long")?;
        self.run_op("register_employee", || {
            self.try_register_employee(actor, name, email, role)
        })
        .await
    }

    async fn try_register_employee(
        &self,
        actor: Ulid,
        name: &str,
        email: &str,
        role: Role,
    ) -> Result<Employee, EngineError> {
        let ledger = self.write_ledger().await?;
        if ledger.employee_count() >= MAX_EMPLOYEES {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        if let Some(existing) = ledger
            .employees()
            .find(|e| e.email.eq_ignore_ascii_case(email))
        {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        let priority = match role {
            Role::Staff => Some(ledger.active_staff().len() as u32 + 1),
            Role::Admin => None,
        };
        let employee = Employee {
            id: Ulid::new(),
            name: name.to_string(),
            email: email.to_string(),
            role,
            active: true,
            priority,
            created_at: now_ms(),
        };
        let ledger = self.commit(
            ledger,
            Event::EmployeeRegistered {
                employee: employee.clone(),
            },
        )
        .await?;
        Self::record_staff_gauge(&ledger);
        drop(ledger);

        info!(employee = %employee.id, ?role, priority, "employee registered");
        self.emit_audit(AuditEvent {
            action: AuditAction::EmployeeRegistered,
            actor,
            subjects: vec![employee.id],
            before: Value::Null,
            after: json!({ "employee": employee }),
            at: now_ms(),
        });
        Ok(employee)
    }

    /// Soft-deactivate. The remaining staff close up to `1..=N-1`.
    /// No-op if already inactive.
    pub async fn deactivate_employee(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        self.run_op("deactivate_employee", || self.try_deactivate_employee(actor, id))
            .await
    }

    async fn try_deactivate_employee(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        let ledger = self.write_ledger().await?;
        let employee = ledger
            .employee(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !employee.active {
            return Ok(());
        }
        let before = current_ranking(&ledger);
        let ranking = ranking_without(&ledger, id);
        let ledger = self.commit(
            ledger,
            Event::EmployeeDeactivated {
                id,
                ranking: ranking.clone(),
            },
        )
        .await?;
        Self::record_staff_gauge(&ledger);
        drop(ledger);

        self.notify.remove(&id);
        info!(employee = %id, "employee deactivated");
        self.emit_audit(AuditEvent {
            action: AuditAction::EmployeeDeactivated,
            actor,
            subjects: vec![id],
            before: json!({ "employee": employee, "ranking": before }),
            after: json!({ "ranking": ranking }),
            at: now_ms(),
        });
        Ok(())
    }

    /// Admin→staff joins at `N+1`; staff→admin leaves the queue.
    pub async fn change_role(&self, actor: Ulid, id: Ulid, role: Role) -> Result<(), EngineError> {
        self.run_op("change_role", || self.try_change_role(actor, id, role))
            .await
    }

    async fn try_change_role(&self, actor: Ulid, id: Ulid, role: Role) -> Result<(), EngineError> {
        let ledger = self.write_ledger().await?;
        let employee = ledger
            .employee(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if employee.role == role {
            return Ok(());
        }
        let before = current_ranking(&ledger);
        let ranking = if role == Role::Staff && employee.active {
            ranking_with(&ledger, id)
        } else {
            ranking_without(&ledger, id)
        };
        let ledger = self.commit(
            ledger,
            Event::EmployeeRoleChanged {
                id,
                role,
                ranking: ranking.clone(),
            },
        )
        .await?;
        Self::record_staff_gauge(&ledger);
        drop(ledger);

        info!(employee = %id, from = ?employee.role, to = ?role, "role changed");
        self.emit_audit(AuditEvent {
            action: AuditAction::RoleChanged,
            actor,
            subjects: vec![id],
            before: json!({ "role": employee.role, "ranking": before }),
            after: json!({ "role": role, "ranking": ranking }),
            at: now_ms(),
        });
        Ok(())
    }

    pub async fn employees(&self) -> Vec<Employee> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Employee> = ledger.employees().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn employee(&self, id: Ulid) -> Option<Employee> {
        self.ledger.read().await.employee(&id).cloned()
    }

    // ── Services ─────────────────────────────────────────────

    pub async fn create_service(&self, actor: Ulid, name: &str, description: &str) -> Result<Service, EngineError> {
        validate_len(name, MAX_NAME_LEN, "service name too long")?;
        validate_len(description, MAX_DESCRIPTION_LEN, "service description too long")?;
        self.run_op("create_service", || self.try_create_service(actor, name, description))
            .await
    }

    async fn try_create_service(&self, actor: Ulid, name: &str, description: &str) -> Result<Service, EngineError> {
        let ledger = self.write_ledger().await?;
        if ledger.service_count() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let service = Service {
            id: Ulid::new(),
            name: name.to_string(),
            description: description.to_string(),
            active: true,
            created_at: now_ms(),
        };
        let ledger = self.commit(
            ledger,
            Event::ServiceCreated {
                service: service.clone(),
            },
        )
        .await?;
        drop(ledger);

        info!(service = %service.id, name, "service created");
        self.emit_audit(AuditEvent {
            action: AuditAction::ServiceCreated,
            actor,
            subjects: vec![service.id],
            before: Value::Null,
            after: json!({ "service": service }),
            at: now_ms(),
        });
        Ok(service)
    }

    /// Withdraw a service from future claims. Existing selections stay.
    pub async fn deactivate_service(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        self.run_op("deactivate_service", || self.try_deactivate_service(actor, id))
            .await
    }

    async fn try_deactivate_service(&self, actor: Ulid, id: Ulid) -> Result<(), EngineError> {
        let ledger = self.write_ledger().await?;
        let service = ledger
            .service(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        if !service.active {
            return Ok(());
        }
        let ledger = self.commit(ledger, Event::ServiceDeactivated { id }).await?;
        drop(ledger);

        info!(service = %id, "service deactivated");
        self.emit_audit(AuditEvent {
            action: AuditAction::ServiceDeactivated,
            actor,
            subjects: vec![id],
            before: json!({ "service": service }),
            after: json!({ "active": false }),
            at: now_ms(),
        });
        Ok(())
    }

    /// Add one `(date, period)` slot to a service's schedule. A schedule is
    /// frozen once the service has been claimed in any year.
    pub async fn add_service_day(
        &self,
        actor: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        period: ShiftPeriod,
        shift_code: &str,
    ) -> Result<ServiceDay, EngineError> {
        validate_len(shift_code, MAX_SHIFT_CODE_LEN, "shift code too long")?;
        self.run_op("add_service_day", || {
            self.try_add_service_day(actor, service_id, date, period, shift_code)
        })
        .await
    }

    async fn try_add_service_day(
        &self,
        actor: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        period: ShiftPeriod,
        shift_code: &str,
    ) -> Result<ServiceDay, EngineError> {
        let ledger = self.write_ledger().await?;
        if ledger.service(&service_id).is_none() {
            return Err(EngineError::NotFound(service_id));
        }
        if let Some(claimed) = ledger.selections_where(|s| s.service_id == service_id).first() {
            return Err(EngineError::ServiceUnavailable {
                service_id,
                year: claimed.year,
            });
        }
        if ledger.has_slot(&service_id, date, period) {
            return Err(EngineError::DuplicateDay {
                service_id,
                slot: format!("{date} {period}"),
            });
        }
        if ledger.days_of(&service_id).len() >= MAX_DAYS_PER_SERVICE {
            return Err(EngineError::LimitExceeded("too many days in service"));
        }

        let day = ServiceDay {
            id: Ulid::new(),
            service_id,
            date,
            period,
            shift_code: shift_code.to_string(),
        };
        let ledger = self.commit(ledger, Event::ServiceDayAdded { day: day.clone() })
            .await?;
        drop(ledger);

        tracing::debug!(service = %service_id, %date, %period, shift_code, "service day added");
        self.emit_audit(AuditEvent {
            action: AuditAction::ServiceDayAdded,
            actor,
            subjects: vec![day.id, service_id],
            before: Value::Null,
            after: json!({ "day": day }),
            at: now_ms(),
        });
        Ok(day)
    }

    /// Every service, by name.
    pub async fn services(&self) -> Vec<Service> {
        let ledger = self.ledger.read().await;
        let mut out: Vec<Service> = ledger.services().cloned().collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn service(&self, id: Ulid) -> Option<Service> {
        self.ledger.read().await.service(&id).cloned()
    }

    /// Base schedule of a service in `(date, period)` order.
    pub async fn service_days(&self, service_id: Ulid) -> Vec<ServiceDay> {
        let ledger = self.ledger.read().await;
        ledger.days_of(&service_id).into_iter().cloned().collect()
    }
}
