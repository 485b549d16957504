//! REST request/response shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::application::lifecycle::SessionSnapshot;
use crate::domain::session::{ChargingSession, LimitKind};
use crate::domain::station::{Connector, Station};
use crate::domain::topup::TopUp;
use crate::support::{CoreError, CoreResult};

// ── Charging ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartChargeBody {
    pub station_id: String,
    pub connector_id: i32,
    /// "energy" or "amount"
    pub limit_kind: String,
    /// kWh for energy limits, minor currency units for amount limits.
    pub limit_value: f64,
}

impl StartChargeBody {
    /// Validate and convert to the engine's canonical units.
    pub fn canonical_limit(&self) -> CoreResult<(LimitKind, i64)> {
        let kind = LimitKind::parse(&self.limit_kind).ok_or_else(|| {
            CoreError::InvalidArgument(format!(
                "limit_kind must be \"energy\" or \"amount\", got {:?}",
                self.limit_kind
            ))
        })?;
        if !self.limit_value.is_finite() || self.limit_value <= 0.0 {
            return Err(CoreError::InvalidArgument(
                "limit_value must be a positive number".into(),
            ));
        }
        let value = match kind {
            LimitKind::Energy => (self.limit_value * 1000.0).round() as i64,
            LimitKind::Amount => {
                if self.limit_value.fract() != 0.0 {
                    return Err(CoreError::InvalidArgument(
                        "amount limits are whole minor units".into(),
                    ));
                }
                self.limit_value as i64
            }
        };
        Ok((kind, value))
    }
}

#[derive(Debug, Serialize)]
pub struct StartChargeResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
pub struct StopChargeBody {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_id: String,
    pub station_id: String,
    pub connector_id: i32,
    pub status: String,
    pub limit_kind: String,
    pub limit_value: i64,
    pub price_per_kwh: i64,
    pub currency: String,
    pub reserved_amount: i64,
    pub energy_wh: i64,
    pub cost: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_charged: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<i64>,
    pub progress_percent: f64,
    pub station_online: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl SessionView {
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        let SessionSnapshot {
            session,
            live_energy_wh,
            live_cost,
            progress_percent,
            station_online,
        } = snapshot;
        Self::build(session, live_energy_wh, live_cost, progress_percent, station_online)
    }

    /// View without live meter context (stop responses).
    pub fn from_session(session: ChargingSession, station_online: bool) -> Self {
        let energy = session
            .energy_wh
            .or_else(|| session.live_energy_wh())
            .unwrap_or(0);
        let cost = session.amount_charged.unwrap_or(0);
        Self::build(session, energy, cost, 0.0, station_online)
    }

    fn build(
        session: ChargingSession,
        energy_wh: i64,
        cost: i64,
        progress_percent: f64,
        station_online: bool,
    ) -> Self {
        Self {
            session_id: session.id,
            station_id: session.station_id,
            connector_id: session.connector_id,
            status: session.status.as_str().to_string(),
            limit_kind: session.limit_kind.as_str().to_string(),
            limit_value: session.limit_value,
            price_per_kwh: session.price_per_kwh,
            currency: session.currency,
            reserved_amount: session.reserved_amount,
            energy_wh,
            cost,
            amount_charged: session.amount_charged,
            refund_amount: session.refund_amount,
            progress_percent,
            station_online,
            created_at: session.created_at,
            started_at: session.started_at,
            stopped_at: session.stopped_at,
        }
    }
}

// ── Balance / top-ups ──────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BalanceView {
    pub balance: i64,
    pub currency: String,
}

#[derive(Debug, Deserialize)]
pub struct TopUpBody {
    /// Minor currency units.
    pub amount: i64,
}

#[derive(Debug, Serialize)]
pub struct TopUpView {
    pub topup_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
    pub amount_requested: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount_paid: Option<i64>,
    pub status: String,
    pub expires_at: DateTime<Utc>,
}

impl TopUpView {
    pub fn from_topup(topup: TopUp) -> Self {
        Self {
            topup_id: topup.id,
            provider_order_id: topup.provider_order_id,
            qr_payload: topup.qr_payload,
            amount_requested: topup.amount_requested,
            amount_paid: topup.amount_paid,
            status: topup.status.as_str().to_string(),
            expires_at: topup.expires_at,
        }
    }
}

// ── Stations ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ConnectorView {
    pub connector_id: i32,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct StationView {
    pub station_id: String,
    pub status: String,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat_age_secs: Option<i64>,
    pub connectors: Vec<ConnectorView>,
}

impl StationView {
    pub fn from_station(station: Station, connectors: Vec<Connector>, online: bool) -> Self {
        let heartbeat_age_secs = station.heartbeat_age_secs(Utc::now());
        Self {
            station_id: station.id,
            status: station.status.as_str().to_string(),
            online,
            heartbeat_age_secs,
            connectors: connectors
                .into_iter()
                .map(|c| ConnectorView {
                    connector_id: c.connector_id,
                    status: c.status.as_str().to_string(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn energy_limit_converts_kwh_to_wh() {
        let body = StartChargeBody {
            station_id: "ST-1".into(),
            connector_id: 1,
            limit_kind: "energy".into(),
            limit_value: 10.5,
        };
        let (kind, value) = body.canonical_limit().unwrap();
        assert_eq!(kind, LimitKind::Energy);
        assert_eq!(value, 10_500);
    }

    #[test]
    fn amount_limit_must_be_whole_minor_units() {
        let mut body = StartChargeBody {
            station_id: "ST-1".into(),
            connector_id: 1,
            limit_kind: "amount".into(),
            limit_value: 150.0,
        };
        assert_eq!(body.canonical_limit().unwrap(), (LimitKind::Amount, 150));

        body.limit_value = 150.5;
        assert!(body.canonical_limit().is_err());
    }

    #[test]
    fn bad_limit_kind_and_nonpositive_values_are_rejected() {
        let body = StartChargeBody {
            station_id: "ST-1".into(),
            connector_id: 1,
            limit_kind: "soc".into(),
            limit_value: 80.0,
        };
        assert!(body.canonical_limit().is_err());

        let body = StartChargeBody {
            station_id: "ST-1".into(),
            connector_id: 1,
            limit_kind: "energy".into(),
            limit_value: 0.0,
        };
        assert!(body.canonical_limit().is_err());
    }
}
