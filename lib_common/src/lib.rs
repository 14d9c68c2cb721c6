// Declare the modules to re-export
#[cfg(feature = "telemetry")]
pub mod core; // category table, record model, dispatcher, poller
#[cfg(feature = "telemetry")]
pub mod ingestors; // per-cycle TSS aggregation
#[cfg(feature = "telemetry")]
pub mod retrieve; // UDP protocol client
#[cfg(feature = "persistence")]
pub mod connections; // per-run SQLite cycle store

// Re-export the bridge building blocks for convenient access
#[cfg(feature = "telemetry")]
pub use crate::core::category::{TelemetryCategory, TelemetrySource};
#[cfg(feature = "telemetry")]
pub use crate::core::dispatcher::Dispatcher;
#[cfg(feature = "telemetry")]
pub use crate::core::model::{PollCycle, TelemetryRecord};
#[cfg(feature = "telemetry")]
pub use crate::retrieve::tss_udp::{FetchError, TssClient, TssClientConfig};
#[cfg(feature = "persistence")]
pub use crate::connections::db_sqlite::{StoreError, TelemetryDb};
#[cfg(feature = "persistence")]
pub use crate::core::poller::{PollerState, TelemetryPoller};
