//! # TSS Poll-Cycle Aggregator
//!
//! One `collect` call produces one [`PollCycle`]: the aggregator captures the
//! cycle timestamp, fetches the three TSS source documents (rover, EVA, LTV)
//! and reshapes them into one record per telemetry category by path lookup
//! from the canonical category table.
//!
//! Each blocking fetch runs on a dedicated blocking worker so the async
//! driver (and the tasks accepting subscriber connections) never block on a
//! socket wait. The fetches are awaited in sequence: the protocol admits one
//! request in flight per socket (see the client module).
//!
//! Failure policy: any single fetch error fails the whole `collect` call with
//! the [`FetchError`] propagated unchanged. Deciding what to do about a lost
//! cycle is the poller's job, not this module's. A *missing field* inside a
//! successfully fetched document is not a failure; the affected category
//! simply carries null data for that cycle.

use std::io;
use std::sync::Arc;

use serde_json::Value;
use tokio::task;

use crate::core::category::{TelemetryCategory, TelemetrySource};
use crate::core::model::{PollCycle, TelemetryRecord};
use crate::retrieve::tss_udp::{FetchError, TssClient};

/// Reshapes the raw TSS responses of one polling interval into a [`PollCycle`].
pub struct TssAggregator {
    client: Arc<TssClient>,
}

impl TssAggregator {
    /// Creates an aggregator driving the given protocol client.
    pub fn new(client: Arc<TssClient>) -> Self {
        Self { client }
    }

    /// Runs one aggregation pass. Invoked once per polling interval.
    pub async fn collect(&self) -> Result<PollCycle, FetchError> {
        // One timestamp for the whole cycle, captured before the first fetch.
        let timestamp = chrono::Utc::now().timestamp();

        let rover = self.fetch_source(TelemetrySource::Rover).await?;
        let eva = self.fetch_source(TelemetrySource::Eva).await?;
        let ltv = self.fetch_source(TelemetrySource::Ltv).await?;

        let records = TelemetryCategory::ALL
            .iter()
            .map(|category| {
                let document = match category.source() {
                    TelemetrySource::Rover => &rover,
                    TelemetrySource::Eva => &eva,
                    TelemetrySource::Ltv => &ltv,
                };
                TelemetryRecord {
                    category: *category,
                    data: lookup(document, category.json_path()),
                    timestamp,
                }
            })
            .collect();

        Ok(PollCycle::new(timestamp, records))
    }

    /// Fetches one source document on a blocking worker.
    async fn fetch_source(&self, source: TelemetrySource) -> Result<Value, FetchError> {
        let client = Arc::clone(&self.client);
        task::spawn_blocking(move || client.fetch(source.command()))
            .await
            .map_err(|e| FetchError::Transport(io::Error::new(io::ErrorKind::Other, e)))?
    }
}

/// Walks `path` into `document`, returning `Value::Null` when any segment is
/// absent.
fn lookup(document: &Value, path: &[&str]) -> Value {
    let mut cursor = document;
    for segment in path {
        match cursor.get(segment) {
            Some(value) => cursor = value,
            None => return Value::Null,
        }
    }
    cursor.clone()
}
