//! # Telemetry Category Table
//!
//! The closed enumeration of telemetry channels carried by the bridge, and the
//! one canonical mapping from each channel to:
//!
//! - its string **key** (`"eva1:telemetry"`-style), used verbatim as the
//!   persistence column name and as the WebSocket route segment,
//! - its **source** (which TSS command group the channel is extracted from),
//! - its **JSON path** inside that source's response document.
//!
//! The aggregator, the cycle store and the downstream router all consume this
//! table, so a channel can never drift between reshaping, storage and routing.

use std::fmt;

/// The three TSS command groups. One UDP fetch per source per poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetrySource {
    /// Pressurized rover telemetry (command 0).
    Rover,
    /// EVA suit telemetry, DCU, IMU, status, error and UIA data (command 1).
    Eva,
    /// LTV location, signal and error data (command 2).
    Ltv,
}

impl TelemetrySource {
    /// Every source, in fetch order.
    pub const ALL: [TelemetrySource; 3] = [
        TelemetrySource::Rover,
        TelemetrySource::Eva,
        TelemetrySource::Ltv,
    ];

    /// The wire command selecting this source on the TSS.
    pub fn command(&self) -> u32 {
        match self {
            TelemetrySource::Rover => 0,
            TelemetrySource::Eva => 1,
            TelemetrySource::Ltv => 2,
        }
    }
}

/// One named telemetry channel. The set is closed at build time; adding a
/// channel means adding a variant and one row in the tables below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TelemetryCategory {
    RoverTelemetry,
    Eva1Telemetry,
    Eva1Dcu,
    Eva1Imu,
    Eva2Telemetry,
    Eva2Dcu,
    Eva2Imu,
    EvaStatus,
    EvaError,
    EvaUia,
    LtvLocation,
    LtvSignal,
    LtvErrors,
}

impl TelemetryCategory {
    /// Every category, in column/broadcast order.
    pub const ALL: [TelemetryCategory; 13] = [
        TelemetryCategory::RoverTelemetry,
        TelemetryCategory::Eva1Telemetry,
        TelemetryCategory::Eva1Dcu,
        TelemetryCategory::Eva1Imu,
        TelemetryCategory::Eva2Telemetry,
        TelemetryCategory::Eva2Dcu,
        TelemetryCategory::Eva2Imu,
        TelemetryCategory::EvaStatus,
        TelemetryCategory::EvaError,
        TelemetryCategory::EvaUia,
        TelemetryCategory::LtvLocation,
        TelemetryCategory::LtvSignal,
        TelemetryCategory::LtvErrors,
    ];

    /// The stable string key: persistence column name and broadcast route key.
    pub fn as_key(&self) -> &'static str {
        match self {
            TelemetryCategory::RoverTelemetry => "rover:pr_telemetry",
            TelemetryCategory::Eva1Telemetry => "eva1:telemetry",
            TelemetryCategory::Eva1Dcu => "eva1:dcu",
            TelemetryCategory::Eva1Imu => "eva1:imu",
            TelemetryCategory::Eva2Telemetry => "eva2:telemetry",
            TelemetryCategory::Eva2Dcu => "eva2:dcu",
            TelemetryCategory::Eva2Imu => "eva2:imu",
            TelemetryCategory::EvaStatus => "eva:status",
            TelemetryCategory::EvaError => "eva:error",
            TelemetryCategory::EvaUia => "eva:uia",
            TelemetryCategory::LtvLocation => "ltv:location",
            TelemetryCategory::LtvSignal => "ltv:signal",
            TelemetryCategory::LtvErrors => "ltv:errors",
        }
    }

    /// Resolves a string key back to its category. This is the gate the
    /// subscription boundary uses to reject unknown channels.
    pub fn from_key(key: &str) -> Option<TelemetryCategory> {
        TelemetryCategory::ALL
            .iter()
            .copied()
            .find(|category| category.as_key() == key)
    }

    /// The TSS command group this channel is extracted from.
    pub fn source(&self) -> TelemetrySource {
        match self {
            TelemetryCategory::RoverTelemetry => TelemetrySource::Rover,
            TelemetryCategory::Eva1Telemetry
            | TelemetryCategory::Eva1Dcu
            | TelemetryCategory::Eva1Imu
            | TelemetryCategory::Eva2Telemetry
            | TelemetryCategory::Eva2Dcu
            | TelemetryCategory::Eva2Imu
            | TelemetryCategory::EvaStatus
            | TelemetryCategory::EvaError
            | TelemetryCategory::EvaUia => TelemetrySource::Eva,
            TelemetryCategory::LtvLocation
            | TelemetryCategory::LtvSignal
            | TelemetryCategory::LtvErrors => TelemetrySource::Ltv,
        }
    }

    /// The path of this channel's data inside its source response document.
    pub fn json_path(&self) -> &'static [&'static str] {
        match self {
            TelemetryCategory::RoverTelemetry => &["pr_telemetry"],
            TelemetryCategory::Eva1Telemetry => &["telemetry", "eva1"],
            TelemetryCategory::Eva1Dcu => &["dcu", "eva1"],
            TelemetryCategory::Eva1Imu => &["imu", "eva1"],
            TelemetryCategory::Eva2Telemetry => &["telemetry", "eva2"],
            TelemetryCategory::Eva2Dcu => &["dcu", "eva2"],
            TelemetryCategory::Eva2Imu => &["imu", "eva2"],
            TelemetryCategory::EvaStatus => &["status"],
            TelemetryCategory::EvaError => &["error"],
            TelemetryCategory::EvaUia => &["uia"],
            TelemetryCategory::LtvLocation => &["location"],
            TelemetryCategory::LtvSignal => &["signal"],
            TelemetryCategory::LtvErrors => &["errors"],
        }
    }
}

impl fmt::Display for TelemetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_keys_are_distinct() {
        let keys: HashSet<&str> = TelemetryCategory::ALL.iter().map(|c| c.as_key()).collect();
        assert_eq!(keys.len(), TelemetryCategory::ALL.len());
    }

    #[test]
    fn test_key_round_trip() {
        for category in TelemetryCategory::ALL {
            assert_eq!(TelemetryCategory::from_key(category.as_key()), Some(category));
        }
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert_eq!(TelemetryCategory::from_key("eva3:telemetry"), None);
        assert_eq!(TelemetryCategory::from_key(""), None);
    }

    #[test]
    fn test_every_source_has_channels() {
        for source in TelemetrySource::ALL {
            assert!(TelemetryCategory::ALL.iter().any(|c| c.source() == source));
        }
    }
}
