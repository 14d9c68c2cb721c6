//! # EVA Telemetry Bridge Server
//!
//! The production bridge binary. It polls the TSS instrument server over the
//! custom UDP protocol once per second, persists every poll cycle to a
//! fresh-per-run SQLite database, and fans each category's record out to the
//! WebSocket subscribers of that category.
//!
//! ## Core Responsibilities:
//! - **Upstream Polling:** Runs the `TelemetryPoller` over a long-lived UDP
//!   socket, with per-cycle failure containment.
//! - **Persistence:** One row per cycle in a timestamp-keyed SQLite file
//!   created for this run.
//! - **Fan-out:** One WebSocket endpoint per telemetry category
//!   (`/ws/{category}`), served by the downstream module.
//! - **Lifecycle:** Layered configuration, per-run file logging, and a
//!   graceful shutdown that releases the UDP transport exactly once.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

mod tss_logic;
use tss_logic::{config, downstream, logger};

use lib_common::connections::db_sqlite::{self, TelemetryDb};
use lib_common::core::dispatcher::Dispatcher;
use lib_common::core::poller::TelemetryPoller;
use lib_common::retrieve::tss_udp::{TssClient, TssClientConfig};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config();
    logger::setup_logging(&config.log_dir(), &config.log_level())?;

    // One UDP socket for the process lifetime; the poller releases it on stop.
    let client = Arc::new(TssClient::connect(TssClientConfig {
        addr: config.tss_addr(),
        timeout: config.fetch_timeout(),
    })?);
    log::info!("TSS client bound for {}", config.tss_addr());

    // Fresh database file for this run.
    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let db_path = db_sqlite::run_database_path(&data_dir);
    log::info!("Persisting poll cycles to {}", db_path.display());
    let db = Arc::new(TelemetryDb::open(&db_path).await?);
    db.initialize().await?;

    let dispatcher = Arc::new(Dispatcher::new());
    let poller = Arc::new(TelemetryPoller::new(
        client,
        db,
        Arc::clone(&dispatcher),
        config.poll_interval(),
    ));

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let poll_cancel = CancellationToken::new();

    let poller_handle = {
        let poller = Arc::clone(&poller);
        let cancel = poll_cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    let downstream_handle = tokio::spawn(downstream::run(
        config.clone(),
        dispatcher,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut term_signal = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("failed to install signal handler");
                term_signal.recv().await;
                log::info!("SIGTERM received, initiating shutdown.");
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Stop the poller (which closes the TSS socket) and drain the server.
    poll_cancel.cancel();
    let _ = shutdown_tx.send(());

    let _ = tokio::try_join!(poller_handle, downstream_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
