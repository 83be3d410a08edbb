use serde_json::json;
use tracing::info;
use ulid::Ulid;

use crate::audit::{AuditAction, AuditEvent};
use crate::model::*;

use super::store::Ledger;
use super::{now_ms, Engine, EngineError};

// ── Queue rules (pure, evaluated against a locked ledger) ─────────

/// Lowest-priority active staff member without a selection for `year`.
pub(super) fn next_eligible(ledger: &Ledger, year: Year) -> Option<&Employee> {
    ledger
        .active_staff()
        .into_iter()
        .find(|e| ledger.selection_for(e.id, year).is_none())
}

/// Only the single front-of-queue employee may claim.
pub(super) fn can_claim(ledger: &Ledger, employee_id: Ulid, year: Year) -> bool {
    ledger.selection_for(employee_id, year).is_none()
        && next_eligible(ledger, year).is_some_and(|e| e.id == employee_id)
}

/// Assign `1..=N` to `order`.
fn ranks(order: impl IntoIterator<Item = Ulid>) -> Ranking {
    order.into_iter().zip(1u32..).collect()
}

/// Full re-ranking that sends `target` to the back of the queue and moves
/// everyone else up one place, keeping their relative order.
/// `target` must be active staff.
pub(super) fn rotated_ranking(ledger: &Ledger, target: Ulid) -> Result<Ranking, EngineError> {
    let staff = ledger.active_staff();
    if !staff.iter().any(|e| e.id == target) {
        return Err(EngineError::EmployeeNotEligible(target));
    }
    let ranking = ranks(
        staff
            .iter()
            .map(|e| e.id)
            .filter(|id| *id != target)
            .chain(std::iter::once(target)),
    );
    debug_assert!(is_permutation(&ranking));
    Ok(ranking)
}

/// Current queue without `leaving`, closed up to `1..=N-1`.
pub(super) fn ranking_without(ledger: &Ledger, leaving: Ulid) -> Ranking {
    ranks(
        ledger
            .active_staff()
            .iter()
            .map(|e| e.id)
            .filter(|id| *id != leaving),
    )
}

/// Current queue with `joining` appended at `N+1`.
pub(super) fn ranking_with(ledger: &Ledger, joining: Ulid) -> Ranking {
    ranks(
        ledger
            .active_staff()
            .iter()
            .map(|e| e.id)
            .filter(|id| *id != joining)
            .chain(std::iter::once(joining)),
    )
}

/// Current queue with `target` moved to `rank`; others shift to make room.
pub(super) fn ranking_moved(ledger: &Ledger, target: Ulid, rank: u32) -> Result<Ranking, EngineError> {
    let mut order: Vec<Ulid> = ledger.active_staff().iter().map(|e| e.id).collect();
    let Some(pos) = order.iter().position(|id| *id == target) else {
        return Err(EngineError::EmployeeNotEligible(target));
    };
    let max = order.len() as u32;
    if rank == 0 || rank > max {
        return Err(EngineError::InvalidRank { rank, max });
    }
    order.remove(pos);
    order.insert(rank as usize - 1, target);
    Ok(ranks(order))
}

/// The ranks are exactly `{1..=N}` with no duplicates.
pub fn is_permutation(ranking: &Ranking) -> bool {
    let mut ranks: Vec<u32> = ranking.iter().map(|(_, rank)| *rank).collect();
    ranks.sort_unstable();
    ranks.into_iter().eq(1..=ranking.len() as u32)
}

pub(super) fn current_ranking(ledger: &Ledger) -> Ranking {
    ledger
        .active_staff()
        .iter()
        .filter_map(|e| e.priority.map(|p| (e.id, p)))
        .collect()
}

impl Engine {
    /// Who may claim next for `year`.
    pub async fn next_eligible(&self, year: Year) -> Option<Employee> {
        let ledger = self.ledger.read().await;
        next_eligible(&ledger, year).cloned()
    }

    pub async fn can_claim(&self, employee_id: Ulid, year: Year) -> bool {
        let ledger = self.ledger.read().await;
        can_claim(&ledger, employee_id, year)
    }

    /// Active staff in queue order.
    pub async fn queue(&self) -> Vec<QueueEntry> {
        let ledger = self.ledger.read().await;
        ledger.active_staff().into_iter().map(QueueEntry::from).collect()
    }

    /// Push `employee_id` to the back of the queue as one atomic re-rank.
    /// Claim and release call the same rotation inside their own transaction.
    pub async fn rotate_after_action(&self, actor: Ulid, employee_id: Ulid) -> Result<(), EngineError> {
        self.run_op("rotate", || self.try_rotate(actor, employee_id))
            .await
    }

    async fn try_rotate(&self, actor: Ulid, employee_id: Ulid) -> Result<(), EngineError> {
        let ledger = self.write_ledger().await?;
        let ranking = rotated_ranking(&ledger, employee_id)?;
        if ranking.is_empty() {
            return Ok(());
        }
        let before = current_ranking(&ledger);
        let ledger = self.commit(ledger, Event::RankingRewritten { ranking: ranking.clone() })
            .await?;
        drop(ledger);

        info!(employee = %employee_id, "priorities rotated");
        self.emit_audit(AuditEvent {
            action: AuditAction::PrioritiesRotated,
            actor,
            subjects: vec![employee_id],
            before: json!({ "ranking": before }),
            after: json!({ "ranking": ranking }),
            at: now_ms(),
        });
        Ok(())
    }

    /// Administrative override: move an active staff member to `rank`.
    pub async fn override_priority(&self, actor: Ulid, employee_id: Ulid, rank: u32) -> Result<(), EngineError> {
        self.run_op("override_priority", || {
            self.try_override_priority(actor, employee_id, rank)
        })
        .await
    }

    async fn try_override_priority(&self, actor: Ulid, employee_id: Ulid, rank: u32) -> Result<(), EngineError> {
        let ledger = self.write_ledger().await?;
        let ranking = ranking_moved(&ledger, employee_id, rank)?;
        let before = current_ranking(&ledger);
        let ledger = self.commit(ledger, Event::RankingRewritten { ranking: ranking.clone() })
            .await?;
        drop(ledger);

        info!(employee = %employee_id, rank, "priority overridden");
        self.emit_audit(AuditEvent {
            action: AuditAction::PriorityOverridden,
            actor,
            subjects: vec![employee_id],
            before: json!({ "ranking": before }),
            after: json!({ "ranking": ranking }),
            at: now_ms(),
        });
        Ok(())
    }
}
