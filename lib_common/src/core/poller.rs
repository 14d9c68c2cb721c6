//! # Telemetry Polling Orchestrator
//!
//! The central coordinator of the bridge. It drives the aggregate/persist/
//! broadcast/sleep cycle until cancelled, and owns the failure
//! containment policy: every error raised by one cycle (fetch or storage) is
//! logged and the loop proceeds to the next cycle unchanged. No cycle's
//! failure is fatal to the process; subscribers simply receive no message for
//! that second.
//!
//! Persistence and broadcast of a successful cycle run as two independent
//! concurrent branches: a failed write never suppresses the broadcast, and a
//! broadcast never waits on the disk beyond the cycle boundary.
//!
//! The inter-cycle delay is fixed (1 s in production) regardless of how long
//! the cycle itself took, so the cadence drifts by the cycle's own execution
//! time. This is the discipline the deployed instrument expects.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::connections::db_sqlite::TelemetryDb;
use crate::core::dispatcher::Dispatcher;
use crate::core::model::PollCycle;
use crate::ingestors::aggregator::TssAggregator;
use crate::retrieve::tss_udp::TssClient;

/// Operational states for the poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    /// Before `run` is first driven.
    Idle,
    /// Steady-state loop.
    Polling,
    /// After cancellation. Terminal.
    Stopped,
}

pub struct TelemetryPoller {
    client: Arc<TssClient>,
    aggregator: TssAggregator,
    db: Arc<TelemetryDb>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    state: RwLock<PollerState>,
}

impl TelemetryPoller {
    /// Creates a poller owning its collaborators for the process lifetime.
    pub fn new(
        client: Arc<TssClient>,
        db: Arc<TelemetryDb>,
        dispatcher: Arc<Dispatcher>,
        interval: Duration,
    ) -> Self {
        Self {
            aggregator: TssAggregator::new(Arc::clone(&client)),
            client,
            db,
            dispatcher,
            interval,
            state: RwLock::new(PollerState::Idle),
        }
    }

    /// Thread-safe access to the current poller state.
    pub async fn state(&self) -> PollerState {
        *self.state.read().await
    }

    /// The main polling loop. Runs until `shutdown` fires, then releases the
    /// TSS transport and flips to [`PollerState::Stopped`].
    pub async fn run(&self, shutdown: CancellationToken) {
        *self.state.write().await = PollerState::Polling;
        log::info!(
            "Telemetry poller started ({} ms cadence)",
            self.interval.as_millis()
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.aggregator.collect().await {
                Ok(cycle) => self.commit_cycle(&cycle).await,
                Err(e) => log::error!("Poll cycle failed: {}", e),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.client.close();
        *self.state.write().await = PollerState::Stopped;
        log::info!("Telemetry poller stopped.");
    }

    /// Persists and broadcasts one cycle. The two branches are independent:
    /// a storage failure is logged here and never reaches the broadcast.
    async fn commit_cycle(&self, cycle: &PollCycle) {
        let persist = async {
            if let Err(e) = self.db.append(cycle).await {
                log::error!("Cycle {} not persisted: {}", cycle.timestamp, e);
            }
        };
        let publish = async {
            for record in cycle.records() {
                self.dispatcher.broadcast(record.category, record.message());
            }
        };
        tokio::join!(persist, publish);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::category::TelemetryCategory;
    use crate::retrieve::tss_udp::{
        decode_request, FetchError, TssClientConfig, HEADER_SIZE, PACKET_SIZE,
    };
    use serde_json::json;
    use std::net::UdpSocket;

    /// A TSS double serving three poll cycles: every request of the second
    /// cycle (the 4th datagram overall, since a failed fetch aborts the rest
    /// of its cycle) is answered with garbage.
    fn spawn_flaky_tss() -> std::net::SocketAddr {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        std::thread::spawn(move || {
            let mut buffer = [0u8; PACKET_SIZE];
            for request_no in 1..=7 {
                let Ok((len, peer)) = server.recv_from(&mut buffer) else {
                    return;
                };
                let Some((_, command)) = decode_request(&buffer[..len]) else {
                    continue;
                };

                let mut reply = vec![0u8; HEADER_SIZE];
                if request_no == 4 {
                    reply.extend_from_slice(b"garbage");
                } else {
                    let document = match command {
                        0 => json!({"pr_telemetry": {"speed": request_no}}),
                        1 => json!({"status": {"ok": true}}),
                        _ => json!({"location": {"lat": 0.0}}),
                    };
                    reply.extend_from_slice(document.to_string().as_bytes());
                }
                reply.resize(PACKET_SIZE, 0);
                server.send_to(&reply, peer).unwrap();
            }
        });

        addr
    }

    async fn recv_next(
        rx: &mut tokio::sync::mpsc::UnboundedReceiver<Arc<serde_json::Value>>,
    ) -> Arc<serde_json::Value> {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("broadcast missing")
            .expect("dispatcher dropped")
    }

    #[tokio::test]
    async fn test_failed_cycle_is_contained() {
        let addr = spawn_flaky_tss();
        let client = Arc::new(
            TssClient::connect(TssClientConfig {
                addr: addr.to_string(),
                timeout: Duration::from_secs(1),
            })
            .unwrap(),
        );

        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(TelemetryDb::open(&dir.path().join("run.db")).await.unwrap());
        db.initialize().await.unwrap();

        let dispatcher = Arc::new(Dispatcher::new());
        let (_id, mut rx) = dispatcher.subscribe(TelemetryCategory::RoverTelemetry);

        // An interval above one second keeps the per-cycle timestamps on
        // distinct epoch seconds, as in production.
        let poller = Arc::new(TelemetryPoller::new(
            Arc::clone(&client),
            Arc::clone(&db),
            Arc::clone(&dispatcher),
            Duration::from_millis(1200),
        ));
        assert_eq!(poller.state().await, PollerState::Idle);

        let shutdown = CancellationToken::new();
        let handle = {
            let poller = Arc::clone(&poller);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { poller.run(shutdown).await })
        };

        // Cycles 1 and 3 must reach the subscriber; cycle 2 fails upstream.
        let first = recv_next(&mut rx).await;
        assert_eq!(first["data"]["speed"], 1);
        let second = recv_next(&mut rx).await;
        assert_eq!(second["data"]["speed"], 5);

        // Let the concurrent persistence branch of cycle 3 settle.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(db.cycle_count().await.unwrap(), 2);
        assert!(rx.try_recv().is_err());

        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(poller.state().await, PollerState::Stopped);

        // The transport was released on shutdown.
        assert!(matches!(client.fetch(0), Err(FetchError::Transport(_))));
    }
}
