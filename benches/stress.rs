use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use ulid::Ulid;

use shiftpick::audit::MemoryAuditSink;
use shiftpick::engine::{Engine, EngineError, SYSTEM_ACTOR};
use shiftpick::model::{Role, ShiftPeriod, Year};
use shiftpick::notify::NotifyHub;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

/// Fresh engine in its own data directory.
fn open_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("shiftpick_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Engine::new(
        dir.join("shiftpick.wal"),
        Arc::new(NotifyHub::new()),
        Arc::new(MemoryAuditSink::new()),
    )
    .expect("open engine");
    Arc::new(engine)
}

async fn setup(engine: &Engine, staff: usize, services: usize, days_per_service: u64) -> (Vec<Ulid>, Vec<Ulid>) {
    let mut employees = Vec::with_capacity(staff);
    for i in 0..staff {
        let e = engine
            .register_employee(SYSTEM_ACTOR, &format!("E{i}"), &format!("e{i}@example.com"), Role::Staff)
            .await
            .expect("register");
        employees.push(e.id);
    }
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
    let mut catalog = Vec::with_capacity(services);
    for i in 0..services {
        let s = engine
            .create_service(SYSTEM_ACTOR, &format!("S{i:04}"), "")
            .await
            .expect("service");
        for d in 0..days_per_service {
            engine
                .add_service_day(SYSTEM_ACTOR, s.id, start + chrono::Days::new(d), ShiftPeriod::Morning, "M")
                .await
                .expect("day");
        }
        catalog.push(s.id);
    }
    println!("  {staff} staff, {services} services x {days_per_service} days");
    (employees, catalog)
}

/// One employee after another claims and releases. Every release sends the
/// claimant to the back, so the front of the queue cycles through the roster.
async fn phase1_sequential(engine: &Engine, catalog: &[Ulid]) {
    let n = 2000;
    let year: Year = 2024;
    let mut claim_latencies = Vec::with_capacity(n);
    let mut release_latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let front = engine.next_eligible(year).await.expect("someone is eligible").id;
        let service = catalog[i % catalog.len()];
        let t = Instant::now();
        engine.claim(front, service, year).await.expect("claim");
        claim_latencies.push(t.elapsed());
        let t = Instant::now();
        engine.release(front, year).await.expect("release");
        release_latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = (2 * n) as f64 / elapsed.as_secs_f64();
    println!("  {n} claim/release pairs in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("claim latency", &mut claim_latencies);
    print_latency("release latency", &mut release_latencies);
}

/// Every employee hammers claim until it wins a service. Most attempts are
/// rejected with NotYourTurn; the queue serializes the winners.
async fn phase2_contended_round(engine: Arc<Engine>, staff: &[Ulid]) {
    let year: Year = 2025;
    let rejected = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for &employee in staff {
        let engine = engine.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let Some(target) = engine.services_available(year).await.first().map(|a| a.service.id) else {
                    return None;
                };
                let t = Instant::now();
                match engine.claim(employee, target, year).await {
                    Ok(_) => return Some(t.elapsed()),
                    Err(EngineError::NotYourTurn { .. } | EngineError::ServiceUnavailable { .. }) => {
                        rejected.fetch_add(1, Ordering::Relaxed);
                        tokio::task::yield_now().await;
                    }
                    Err(e) => panic!("unexpected claim error: {e}"),
                }
            }
        }));
    }

    let mut winners = Vec::new();
    for h in handles {
        if let Some(latency) = h.await.expect("claim task") {
            winners.push(latency);
        }
    }

    let elapsed = start.elapsed();
    println!(
        "  {} winning claims in {:.2}s, {} rejected attempts",
        winners.len(),
        elapsed.as_secs_f64(),
        rejected.load(Ordering::Relaxed)
    );
    print_latency("winning claim latency", &mut winners);
}

/// Availability and calendar reads while a writer cycles claims.
async fn phase3_read_under_load(engine: Arc<Engine>, catalog: Vec<Ulid>) {
    let year: Year = 2026;
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let engine = engine.clone();
        let stop = stop.clone();
        tokio::spawn(async move {
            let mut i = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let Some(front) = engine.next_eligible(year).await else { break };
                let service = catalog[i % catalog.len()];
                if engine.claim(front.id, service, year).await.is_ok() {
                    let _ = engine.release(front.id, year).await;
                }
                i += 1;
            }
        })
    };

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                if r % 2 == 0 {
                    engine.services_available(year).await;
                } else {
                    engine.calendar(2024, Some(1)).await;
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader task"));
    }
    stop.store(true, Ordering::Relaxed);
    let _ = writer.await;

    print_latency("availability/calendar read", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    println!("=== shiftpick stress benchmark ===\n");

    println!("[setup]");
    let engine = open_engine();
    let (staff, catalog) = setup(&engine, 200, 250, 30).await;

    println!("\n[phase 1] sequential claim/release");
    phase1_sequential(&engine, &catalog).await;

    println!("\n[phase 2] contended claim round");
    phase2_contended_round(engine.clone(), &staff).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(engine.clone(), catalog).await;

    println!("\n[compaction]");
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.expect("compact");
    println!("  {appends} WAL records compacted in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    println!("\n=== done ===");
}
