//! Station and connector entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Station status as tracked by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationStatus {
    Unknown,
    Available,
    Occupied,
    Faulted,
    Unavailable,
    Offline,
}

impl StationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Faulted => "faulted",
            Self::Unavailable => "unavailable",
            Self::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "available" => Self::Available,
            "occupied" => Self::Occupied,
            "faulted" => Self::Faulted,
            "unavailable" => Self::Unavailable,
            "offline" => Self::Offline,
            _ => Self::Unknown,
        }
    }
}

/// Identity details reported in BootNotification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootInfo {
    pub vendor: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_version: Option<String>,
}

/// A charging station. `id` is the free-form identifier the station
/// presents in its WebSocket path at handshake.
#[derive(Debug, Clone)]
pub struct Station {
    pub id: String,
    pub location_id: Option<String>,
    pub status: StationStatus,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub boot_info: Option<BootInfo>,
    /// Per-station price override, minor units per kWh.
    pub price_per_kwh: Option<i64>,
    pub registered_at: DateTime<Utc>,
}

impl Station {
    /// Seconds since the last heartbeat, if any was ever received.
    pub fn heartbeat_age_secs(&self, now: DateTime<Utc>) -> Option<i64> {
        self.last_heartbeat_at
            .map(|hb| now.signed_duration_since(hb).num_seconds())
    }

    /// Liveness per the heartbeat tolerance: `2 × interval + 30 s`.
    pub fn is_live(&self, now: DateTime<Utc>, heartbeat_interval_secs: i64) -> bool {
        match self.heartbeat_age_secs(now) {
            Some(age) => age <= 2 * heartbeat_interval_secs + 30,
            None => false,
        }
    }
}

/// Connector status. `connector_id = 0` addresses the station itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorStatus {
    Available,
    Occupied,
    Faulted,
    Unavailable,
}

impl ConnectorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Occupied => "occupied",
            Self::Faulted => "faulted",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "occupied" => Self::Occupied,
            "faulted" => Self::Faulted,
            "unavailable" => Self::Unavailable,
            _ => Self::Available,
        }
    }

    /// Map an OCPP 1.6 StatusNotification status onto the connector model.
    pub fn from_ocpp(status: &str) -> Self {
        match status {
            "Available" => Self::Available,
            "Faulted" => Self::Faulted,
            "Unavailable" => Self::Unavailable,
            // Preparing, Charging, SuspendedEV, SuspendedEVSE, Finishing, Reserved
            _ => Self::Occupied,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Connector {
    pub station_id: String,
    pub connector_id: i32,
    pub status: ConnectorStatus,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn liveness_follows_heartbeat_tolerance() {
        let now = Utc::now();
        let mut station = Station {
            id: "ST-1".into(),
            location_id: None,
            status: StationStatus::Available,
            last_heartbeat_at: Some(now - Duration::seconds(500)),
            boot_info: None,
            price_per_kwh: None,
            registered_at: now,
        };
        // tolerance for interval 300 is 630 s
        assert!(station.is_live(now, 300));
        station.last_heartbeat_at = Some(now - Duration::seconds(700));
        assert!(!station.is_live(now, 300));
        station.last_heartbeat_at = None;
        assert!(!station.is_live(now, 300));
    }

    #[test]
    fn ocpp_status_mapping() {
        assert_eq!(ConnectorStatus::from_ocpp("Available"), ConnectorStatus::Available);
        assert_eq!(ConnectorStatus::from_ocpp("Charging"), ConnectorStatus::Occupied);
        assert_eq!(ConnectorStatus::from_ocpp("Preparing"), ConnectorStatus::Occupied);
        assert_eq!(ConnectorStatus::from_ocpp("Faulted"), ConnectorStatus::Faulted);
        assert_eq!(ConnectorStatus::from_ocpp("Unavailable"), ConnectorStatus::Unavailable);
    }

    #[test]
    fn station_status_roundtrip() {
        for status in [
            StationStatus::Unknown,
            StationStatus::Available,
            StationStatus::Occupied,
            StationStatus::Faulted,
            StationStatus::Unavailable,
            StationStatus::Offline,
        ] {
            assert_eq!(StationStatus::parse(status.as_str()), status);
        }
    }
}
