//! # Bridge End-to-End Cycle Tests
//!
//! This runner drives the real bridge stack (protocol client, aggregator,
//! cycle store, dispatcher and poller) against an in-process TSS double
//! speaking the actual wire protocol on a loopback UDP socket.
//!
//! ## Purpose:
//! The unit tests beside each module cover the pieces in isolation; this
//! binary checks the assembled pipeline: request framing on a real socket,
//! reshaping into categories, per-run persistence, category-scoped fan-out,
//! and the poller's failure containment across a faulted cycle.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use lib_common::connections::db_sqlite::TelemetryDb;
use lib_common::core::category::TelemetryCategory;
use lib_common::core::dispatcher::Dispatcher;
use lib_common::core::poller::{PollerState, TelemetryPoller};
use lib_common::ingestors::aggregator::TssAggregator;
use lib_common::retrieve::tss_udp::{
    decode_request, decode_response, encode_request, FetchError, TssClient, TssClientConfig,
    HEADER_SIZE, PACKET_SIZE,
};

/// Spawns a TSS double that answers every request with the canned document
/// for its command, except the `faulted` request number (1-based), which
/// gets a non-JSON payload. The thread serves until the process exits.
fn spawn_tss_double(faulted: Option<usize>) -> SocketAddr {
    let server = UdpSocket::bind("127.0.0.1:0").expect("bind TSS double");
    let addr = server.local_addr().expect("TSS double addr");

    std::thread::spawn(move || {
        let mut buffer = [0u8; PACKET_SIZE];
        let mut request_no = 0usize;
        loop {
            let Ok((len, peer)) = server.recv_from(&mut buffer) else {
                return;
            };
            request_no += 1;
            let Some((_, command)) = decode_request(&buffer[..len]) else {
                continue;
            };

            let mut reply = buffer[..HEADER_SIZE].to_vec();
            if Some(request_no) == faulted {
                reply.extend_from_slice(b"\xfe\xffdefinitely not json");
            } else {
                let document = match command {
                    0 => json!({"pr_telemetry": {"speed": 5, "cycle": request_no}}),
                    1 => json!({
                        "telemetry": {"eva1": {"heart_rate": 80}, "eva2": {"heart_rate": 85}},
                        "dcu": {"eva1": {"batt": true}, "eva2": {"batt": true}},
                        "status": {},
                    }),
                    _ => json!({"location": {"lat": -26.0}, "signal": {"strength": 42.0}}),
                };
                reply.extend_from_slice(document.to_string().as_bytes());
            }
            reply.resize(PACKET_SIZE, 0);
            let _ = server.send_to(&reply, peer);
        }
    });

    addr
}

fn client_for(addr: SocketAddr) -> Arc<TssClient> {
    Arc::new(
        TssClient::connect(TssClientConfig {
            addr: addr.to_string(),
            timeout: Duration::from_secs(1),
        })
        .expect("bind TSS client"),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("--- Starting Bridge Cycle Tests ---");

    // --- TEST 1: Wire codec ---
    // The 8-byte request header round-trips, and padded/unpadded response
    // datagrams decode identically.
    println!("\n[Test 1] Wire codec round trip...");
    let packet = encode_request(1_700_000_000, 2);
    assert_eq!(decode_request(&packet), Some((1_700_000_000, 2)));

    let document = json!({"status": {"ok": true}});
    let mut unpadded = vec![0u8; HEADER_SIZE];
    unpadded.extend_from_slice(document.to_string().as_bytes());
    let mut padded = unpadded.clone();
    padded.resize(PACKET_SIZE, 0);
    assert_eq!(decode_response(&unpadded)?, decode_response(&padded)?);
    println!("✅ Header and padding handling verified.");

    // --- TEST 2: Live fetch over loopback UDP ---
    println!("\n[Test 2] Fetch against the TSS double...");
    let addr = spawn_tss_double(None);
    let client = client_for(addr);
    let rover = client.fetch(0)?;
    assert_eq!(rover["pr_telemetry"]["speed"], 5);
    println!("✅ Fetched rover document: {}", rover["pr_telemetry"]);

    // --- TEST 3: Full-cycle aggregation ---
    // All 13 categories, one shared timestamp, nulls for absent channels.
    println!("\n[Test 3] Aggregating one poll cycle...");
    let aggregator = TssAggregator::new(Arc::clone(&client));
    let cycle = aggregator.collect().await?;
    assert_eq!(cycle.records().len(), TelemetryCategory::ALL.len());
    assert!(cycle.records().iter().all(|r| r.timestamp == cycle.timestamp));
    let eva_error = cycle.record(TelemetryCategory::EvaError).expect("record");
    assert!(eva_error.data.is_null());
    println!("✅ Cycle {} reshaped, absent channels are null.", cycle.timestamp);

    // --- TEST 4: Per-run persistence ---
    println!("\n[Test 4] Persisting cycles...");
    let dir = tempfile::tempdir()?;
    let db = TelemetryDb::open(&dir.path().join("run.db")).await?;
    db.initialize().await?;
    db.initialize().await?; // idempotent
    db.append(&cycle).await?;
    let stored = db
        .read_category(cycle.timestamp, TelemetryCategory::RoverTelemetry)
        .await?
        .expect("row");
    assert_eq!(stored["speed"], 5);
    let conflict = db.append(&cycle).await;
    assert!(conflict.is_err(), "duplicate timestamp must be rejected");
    assert_eq!(db.cycle_count().await?, 1);
    println!("✅ One row per cycle, duplicate key rejected.");

    // --- TEST 5: Category-scoped fan-out ---
    println!("\n[Test 5] Broadcasting with a dead subscriber...");
    let dispatcher = Dispatcher::new();
    let category = TelemetryCategory::RoverTelemetry;
    let (_alive, mut alive_rx) = dispatcher.subscribe(category);
    let (_dead, dead_rx) = dispatcher.subscribe(category);
    drop(dead_rx);
    let delivered = dispatcher.broadcast(category, json!({"speed": 9}));
    assert_eq!(delivered, 1);
    assert_eq!(dispatcher.subscriber_count(category), 1);
    assert_eq!(alive_rx.try_recv().expect("delivery")["speed"], 9);
    println!("✅ Dead subscriber pruned, live one served.");

    // --- TEST 6: Poller failure containment ---
    // Request 4 (the first fetch of cycle 2) is faulted: cycles 1 and 3 must
    // persist and broadcast, cycle 2 must vanish without crashing anything.
    println!("\n[Test 6] Three cycles with a faulted middle cycle...");
    let addr = spawn_tss_double(Some(4));
    let client = client_for(addr);
    let db = Arc::new(TelemetryDb::open(&dir.path().join("poller.db")).await?);
    db.initialize().await?;
    let dispatcher = Arc::new(Dispatcher::new());
    let (_id, mut rx) = dispatcher.subscribe(TelemetryCategory::RoverTelemetry);

    let poller = Arc::new(TelemetryPoller::new(
        Arc::clone(&client),
        Arc::clone(&db),
        Arc::clone(&dispatcher),
        Duration::from_millis(1200),
    ));
    let shutdown = CancellationToken::new();
    let handle = {
        let poller = Arc::clone(&poller);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { poller.run(shutdown).await })
    };

    for expected_cycle in [1, 5] {
        let message = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await?
            .expect("dispatcher closed");
        assert_eq!(message["data"]["cycle"], expected_cycle);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(db.cycle_count().await?, 2);

    shutdown.cancel();
    handle.await?;
    assert_eq!(poller.state().await, PollerState::Stopped);
    assert!(matches!(client.fetch(0), Err(FetchError::Transport(_))));
    println!("✅ Two cycles persisted and broadcast, transport released.");

    println!("\n--- All Tests Passed Successfully ---");
    Ok(())
}
