//! Record and cycle value types flowing between the aggregator, the cycle
//! store and the dispatcher.

use serde_json::{json, Value};

use crate::core::category::TelemetryCategory;

/// One category's data for one poll cycle. Immutable after construction; not
/// retained past the cycle (the store is the durability layer).
#[derive(Debug, Clone)]
pub struct TelemetryRecord {
    /// The channel this record belongs to.
    pub category: TelemetryCategory,
    /// The reshaped payload; `Value::Null` when the source document did not
    /// carry this channel.
    pub data: Value,
    /// Cycle timestamp, Unix seconds, shared by every record of the cycle.
    pub timestamp: i64,
}

impl TelemetryRecord {
    /// Builds the message broadcast to this category's subscribers.
    pub fn message(&self) -> Value {
        json!({
            "data": self.data,
            "timestamp": self.timestamp,
        })
    }
}

/// The full set of records produced by one aggregator pass, sharing one
/// timestamp. Constructed, persisted, broadcast, discarded.
#[derive(Debug, Clone)]
pub struct PollCycle {
    /// The timestamp captured once at cycle start, Unix seconds.
    pub timestamp: i64,
    records: Vec<TelemetryRecord>,
}

impl PollCycle {
    /// Assembles a cycle. Records are expected in `TelemetryCategory::ALL`
    /// order, one per category, all stamped with `timestamp`.
    pub fn new(timestamp: i64, records: Vec<TelemetryRecord>) -> Self {
        Self { timestamp, records }
    }

    /// Every record of the cycle, in category order.
    pub fn records(&self) -> &[TelemetryRecord] {
        &self.records
    }

    /// Looks up one category's record.
    pub fn record(&self, category: TelemetryCategory) -> Option<&TelemetryRecord> {
        self.records.iter().find(|r| r.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_carries_data_and_timestamp() {
        let record = TelemetryRecord {
            category: TelemetryCategory::RoverTelemetry,
            data: json!({"speed": 5}),
            timestamp: 1_700_000_000,
        };
        let message = record.message();
        assert_eq!(message["data"]["speed"], 5);
        assert_eq!(message["timestamp"], 1_700_000_000);
    }

    #[test]
    fn test_cycle_lookup() {
        let records = vec![TelemetryRecord {
            category: TelemetryCategory::EvaUia,
            data: Value::Null,
            timestamp: 7,
        }];
        let cycle = PollCycle::new(7, records);
        assert!(cycle.record(TelemetryCategory::EvaUia).is_some());
        assert!(cycle.record(TelemetryCategory::LtvSignal).is_none());
    }
}
