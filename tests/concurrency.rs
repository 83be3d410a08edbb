use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};
use ulid::Ulid;

use shiftpick::audit::MemoryAuditSink;
use shiftpick::engine::{is_permutation, Engine, EngineError, SYSTEM_ACTOR};
use shiftpick::model::{Role, ShiftPeriod, Year};
use shiftpick::notify::NotifyHub;

const YEAR: Year = 2024;

// ── Test infrastructure ──────────────────────────────────────

fn start_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("shiftpick_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let path: PathBuf = dir.join("shiftpick.wal");
    Arc::new(Engine::new(path, Arc::new(NotifyHub::new()), Arc::new(MemoryAuditSink::new())).unwrap())
}

async fn roster(engine: &Engine, staff: usize, services: usize) -> (Vec<Ulid>, Vec<Ulid>) {
    let mut employees = Vec::new();
    for i in 0..staff {
        let e = engine
            .register_employee(SYSTEM_ACTOR, &format!("E{i}"), &format!("e{i}@example.com"), Role::Staff)
            .await
            .unwrap();
        employees.push(e.id);
    }
    let mut catalog = Vec::new();
    for i in 0..services {
        let s = engine
            .create_service(SYSTEM_ACTOR, &format!("S{i:03}"), "")
            .await
            .unwrap();
        let day = NaiveDate::from_ymd_opt(YEAR, 1, 1).unwrap() + chrono::Days::new(i as u64);
        engine
            .add_service_day(SYSTEM_ACTOR, s.id, day, ShiftPeriod::Morning, "M")
            .await
            .unwrap();
        catalog.push(s.id);
    }
    (employees, catalog)
}

fn expected_loser(e: &EngineError) -> bool {
    matches!(
        e,
        EngineError::ServiceUnavailable { .. } | EngineError::NotYourTurn { .. } | EngineError::ConflictRetry
    )
}

// ── Races ────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_claims_for_one_service_have_one_winner() {
    let engine = start_engine();
    let (staff, catalog) = roster(&engine, 4, 1).await;
    let service = catalog[0];

    let mut handles = Vec::new();
    for &employee in &staff {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.claim(employee, service, YEAR).await }));
    }

    let mut wins = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) => assert!(expected_loser(&e), "unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(engine.selections_by_year(YEAR).await.len(), 1);
    let ranks: Vec<_> = engine
        .queue()
        .await
        .into_iter()
        .map(|q| (q.employee_id, q.priority.unwrap()))
        .collect();
    assert!(is_permutation(&ranks));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_employee_racing_two_services_claims_once() {
    let engine = start_engine();
    let (staff, catalog) = roster(&engine, 2, 2).await;
    let front = staff[0];

    let a = {
        let engine = engine.clone();
        let service = catalog[0];
        tokio::spawn(async move { engine.claim(front, service, YEAR).await })
    };
    let b = {
        let engine = engine.clone();
        let service = catalog[1];
        tokio::spawn(async move { engine.claim(front, service, YEAR).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(loser, EngineError::NotYourTurn { employee_id: front, year: YEAR });
    assert_eq!(engine.selections_by_employee(front).await.len(), 1);
}

/// Every employee keeps trying until it is their turn. The queue must hand
/// out exactly one distinct service per employee.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_round_under_contention() {
    let engine = start_engine();
    let (staff, _) = roster(&engine, 12, 16).await;

    let mut handles = Vec::new();
    for &employee in &staff {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            loop {
                if engine.selection(employee, YEAR).await.is_some() {
                    return;
                }
                let Some(target) = engine.services_available(YEAR).await.first().map(|a| a.service.id) else {
                    return;
                };
                match engine.claim(employee, target, YEAR).await {
                    Ok(_) => return,
                    Err(e) => assert!(expected_loser(&e), "unexpected error: {e}"),
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    let all = async {
        for h in handles {
            h.await.unwrap();
        }
    };
    assert_ok!(tokio::time::timeout(Duration::from_secs(20), all).await);

    let selections = engine.selections_by_year(YEAR).await;
    assert_eq!(selections.len(), staff.len());
    let services: HashSet<Ulid> = selections.iter().map(|s| s.service_id).collect();
    let employees: HashSet<Ulid> = selections.iter().map(|s| s.employee_id).collect();
    assert_eq!(services.len(), staff.len());
    assert_eq!(employees.len(), staff.len());

    let progress = engine.progress(YEAR).await;
    assert_eq!(progress.percent, 100);
    assert!(engine.next_eligible(YEAR).await.is_none());
    assert_eq!(engine.services_available(YEAR).await.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_exchanges_cannot_take_the_same_day() {
    let engine = start_engine();
    let (staff, _) = roster(&engine, 2, 0).await;
    let service = engine.create_service(SYSTEM_ACTOR, "Shared", "").await.unwrap();
    let mut days = Vec::new();
    for d in 1..=3 {
        let day = engine
            .add_service_day(
                SYSTEM_ACTOR,
                service.id,
                NaiveDate::from_ymd_opt(YEAR, 2, d).unwrap(),
                ShiftPeriod::Night,
                "N",
            )
            .await
            .unwrap();
        days.push(day.id);
    }
    let holder = staff[0];
    assert_ok!(engine.claim(holder, service.id, YEAR).await);

    // Two exchanges racing for day 3 from different release days.
    let first = {
        let engine = engine.clone();
        let (release, take) = (days[0], days[2]);
        tokio::spawn(async move { engine.exchange(holder, YEAR, release, take).await })
    };
    let second = {
        let engine = engine.clone();
        let (release, take) = (days[1], days[2]);
        tokio::spawn(async move { engine.exchange(holder, YEAR, release, take).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.contains(&Err(EngineError::DayUnavailable(days[2]))));

    let active: Vec<_> = engine
        .exceptions(service.id)
        .await
        .into_iter()
        .filter(|e| e.active)
        .collect();
    assert_eq!(active.len(), 2);

    // The other employee has no selection to exchange with.
    assert_err!(engine.exchange(staff[1], YEAR, days[0], days[1]).await);
}
