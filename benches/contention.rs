//! Contention benchmark against a running server.
//!
//!     cargo run --release -- --data-dir /tmp/bench &
//!     cargo bench --bench contention

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls};

const HOUR: i64 = 3_600_000; // 1 hour in ms
const SLOT: i64 = 30 * 60_000;

async fn connect(host: &str, port: u16) -> Client {
    let mut config = Config::new();
    config.host(host).port(port).dbname("bookwell").user("bench");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

async fn create_resource(client: &Client, name: &str) -> i64 {
    let row = client
        .query_one(
            &format!("INSERT INTO resources (name) VALUES ('{name}') RETURNING *"),
            &[],
        )
        .await
        .expect("create resource");
    row.get("id")
}

/// Sequential bookings on distinct slots: pure write-path latency.
async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let rid = create_resource(&client, "sequential").await;

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n as i64 {
        let t = Instant::now();
        client
            .batch_execute(&format!(
                r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({rid}, {}, {}, 'bench')"#,
                i * HOUR,
                (i + 1) * HOUR
            ))
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }
    println!(
        "  {n} bookings in {:.2}s ({:.0} ops/s)",
        start.elapsed().as_secs_f64(),
        n as f64 / start.elapsed().as_secs_f64()
    );
    print_latency("insert", &mut latencies);
}

/// Many clients race for the same few slots on one resource. Every candidate
/// overlaps exactly one slot, so at most `slots` bookings may ever win.
async fn phase2_contention(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let rid = create_resource(&setup, "contended").await;

    let slots = 8;
    let clients = 32;
    let attempts_per_client = 50;
    let wins = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for c in 0..clients {
        let host = host.to_string();
        let wins = wins.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let mut latencies = Vec::with_capacity(attempts_per_client);
            for a in 0..attempts_per_client {
                // Jitter inside the slot so candidates overlap without being identical.
                let slot = ((c + a) % slots) as i64;
                let offset = ((c * 7 + a) % 10) as i64 * 60_000;
                let s = slot * HOUR + offset;
                let e = s + SLOT;
                let t = Instant::now();
                let result = client
                    .execute(
                        &format!(
                            r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({rid}, {s}, {e}, 'client-{c}')"#
                        ),
                        &[],
                    )
                    .await;
                latencies.push(t.elapsed());
                match result {
                    Ok(_) => {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) if err.code() == Some(&SqlState::EXCLUSION_VIOLATION) => {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => panic!("unexpected error: {err}"),
                }
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for h in handles {
        latencies.extend(h.await.expect("client task"));
    }

    let wins = wins.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {clients} clients x {attempts_per_client} attempts in {:.2}s: {wins} won, {conflicts} conflicted",
        start.elapsed().as_secs_f64()
    );
    print_latency("contended insert", &mut latencies);

    let stored = setup
        .query(&format!("SELECT * FROM bookings WHERE resource_id = {rid}"), &[])
        .await
        .expect("list bookings");
    assert!(
        wins <= slots && stored.len() == wins,
        "double booking: {wins} winners, {} stored, {slots} slots",
        stored.len()
    );
    for pair in stored.windows(2) {
        let prev_end: i64 = pair[0].get("end");
        let next_start: i64 = pair[1].get("start");
        assert!(prev_end <= next_start, "stored bookings overlap");
    }
    println!("  invariant held: {} bookings, none overlapping", stored.len());
}

/// Read latency of the conflict query while writers hammer the same resource.
async fn phase3_reads_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let rid = create_resource(&setup, "read-under-load").await;

    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port).await;
        for i in 0..1000i64 {
            let _ = client
                .batch_execute(&format!(
                    r#"INSERT INTO bookings (resource_id, start, "end", booked_by) VALUES ({rid}, {}, {}, 'writer')"#,
                    i * HOUR,
                    i * HOUR + SLOT
                ))
                .await;
        }
    });

    let reader = connect(host, port).await;
    let mut latencies = Vec::with_capacity(1000);
    for i in 0..1000i64 {
        let t = Instant::now();
        reader
            .query_one(
                &format!(
                    r#"SELECT * FROM conflicts WHERE resource_id = {rid} AND start = {} AND "end" = {}"#,
                    i * HOUR,
                    i * HOUR + HOUR
                ),
                &[],
            )
            .await
            .expect("conflict query");
        latencies.push(t.elapsed());
    }
    let _ = writer.await;
    print_latency("conflict query", &mut latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("BOOKWELL_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("BOOKWELL_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid BOOKWELL_PORT");

    println!("=== bookwell contention benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential bookings");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended slots");
    phase2_contention(&host, port).await;

    println!("\n[phase 3] conflict reads under write load");
    phase3_reads_under_load(&host, port).await;

    println!("\n=== benchmark complete ===");
}
