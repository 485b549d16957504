//! Charging session entity and the money/energy arithmetic around it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session lifecycle status.
///
/// `pending → starting → active → stopping → stopped` is the happy path;
/// `failed` and `expired` are terminal compensation outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Pending,
    Starting,
    Active,
    Stopping,
    Stopped,
    Failed,
    Expired,
}

impl SessionStatus {
    pub const OPEN: &'static [SessionStatus] = &[
        SessionStatus::Pending,
        SessionStatus::Starting,
        SessionStatus::Active,
        SessionStatus::Stopping,
    ];

    pub fn is_open(&self) -> bool {
        Self::OPEN.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "starting" => Some(Self::Starting),
            "active" => Some(Self::Active),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// What the client bounded the charge by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitKind {
    /// `limit_value` is watt-hours.
    Energy,
    /// `limit_value` is minor currency units.
    Amount,
}

impl LimitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Energy => "energy",
            Self::Amount => "amount",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "energy" => Some(Self::Energy),
            "amount" => Some(Self::Amount),
            _ => None,
        }
    }
}

/// Cost of `energy_wh` at `price_per_kwh` minor units, rounded up.
pub fn cost_of_energy(energy_wh: i64, price_per_kwh: i64) -> i64 {
    if energy_wh <= 0 {
        return 0;
    }
    (energy_wh * price_per_kwh + 999) / 1000
}

/// A charging session from reservation to settlement.
#[derive(Debug, Clone)]
pub struct ChargingSession {
    pub id: String,
    pub client_id: String,
    pub station_id: String,
    pub connector_id: i32,
    pub limit_kind: LimitKind,
    pub limit_value: i64,
    /// Price snapshot taken at reservation time, minor units per kWh.
    pub price_per_kwh: i64,
    pub currency: String,
    /// OCPP authorization tag handed to the station via RemoteStartTransaction.
    pub id_tag: String,
    pub reserved_amount: i64,
    pub ocpp_tx_id: Option<i32>,
    pub meter_start: Option<i64>,
    pub meter_stop: Option<i64>,
    /// Most recent meter reading seen in MeterValues, watt-hours.
    pub last_meter_wh: Option<i64>,
    pub energy_wh: Option<i64>,
    pub amount_charged: Option<i64>,
    pub refund_amount: Option<i64>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub stopped_at: Option<DateTime<Utc>>,
}

impl ChargingSession {
    /// Create a freshly reserved session in `pending` state with a
    /// generated id and an id_tag derived from it.
    pub fn reserve(
        client_id: impl Into<String>,
        station_id: impl Into<String>,
        connector_id: i32,
        limit_kind: LimitKind,
        limit_value: i64,
        price_per_kwh: i64,
        currency: impl Into<String>,
        reserved_amount: i64,
    ) -> Self {
        let id = Uuid::new_v4();
        Self {
            id: id.to_string(),
            client_id: client_id.into(),
            station_id: station_id.into(),
            connector_id,
            limit_kind,
            limit_value,
            price_per_kwh,
            currency: currency.into(),
            id_tag: make_id_tag(&id),
            reserved_amount,
            ocpp_tx_id: None,
            meter_start: None,
            meter_stop: None,
            last_meter_wh: None,
            energy_wh: None,
            amount_charged: None,
            refund_amount: None,
            status: SessionStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            stopped_at: None,
        }
    }

    /// Energy delivered so far, from the latest meter reading.
    pub fn live_energy_wh(&self) -> Option<i64> {
        match (self.meter_start, self.last_meter_wh) {
            (Some(start), Some(last)) => Some((last - start).max(0)),
            _ => None,
        }
    }

    /// Whether the live reading has reached the session's limit.
    pub fn limit_reached(&self) -> bool {
        let Some(energy) = self.live_energy_wh() else {
            return false;
        };
        match self.limit_kind {
            LimitKind::Energy => energy >= self.limit_value,
            LimitKind::Amount => cost_of_energy(energy, self.price_per_kwh) >= self.reserved_amount,
        }
    }

    /// Settle the final numbers from a stop meter reading.
    ///
    /// `amount_charged` is capped at the reservation, so the refund is
    /// never negative and `amount_charged + refund = reserved_amount`.
    pub fn settle(&self, meter_stop: i64) -> Settlement {
        let energy_wh = self
            .meter_start
            .map(|start| (meter_stop - start).max(0))
            .unwrap_or(0);
        let amount_charged =
            cost_of_energy(energy_wh, self.price_per_kwh).min(self.reserved_amount);
        Settlement {
            energy_wh,
            amount_charged,
            refund: self.reserved_amount - amount_charged,
        }
    }
}

/// Final numbers for a session that reached StopTransaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub energy_wh: i64,
    pub amount_charged: i64,
    pub refund: i64,
}

/// Derive the OCPP id_tag from a session id. OCPP caps idTag at 20
/// characters, so only a prefix of the UUID is carried; correlation back
/// to the session is by column lookup, never by decoding.
pub fn make_id_tag(session_id: &Uuid) -> String {
    let hex = session_id.simple().to_string();
    format!("VL-{}", &hex[..17])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(limit_kind: LimitKind, limit_value: i64, reserved: i64) -> ChargingSession {
        let mut s = ChargingSession::reserve(
            "client-1", "ST-1", 1, limit_kind, limit_value, 1500, "KGS", reserved,
        );
        s.meter_start = Some(1000);
        s.status = SessionStatus::Active;
        s
    }

    #[test]
    fn cost_rounds_up() {
        assert_eq!(cost_of_energy(10_000, 1500), 15_000);
        assert_eq!(cost_of_energy(1, 1500), 2);
        assert_eq!(cost_of_energy(0, 1500), 0);
        assert_eq!(cost_of_energy(-5, 1500), 0);
        assert_eq!(cost_of_energy(999, 1000), 999);
        assert_eq!(cost_of_energy(1001, 1000), 1002);
    }

    #[test]
    fn id_tag_fits_ocpp_cistring20() {
        let tag = make_id_tag(&Uuid::new_v4());
        assert_eq!(tag.len(), 20);
        assert!(tag.starts_with("VL-"));
    }

    #[test]
    fn energy_limit_reached_on_live_reading() {
        let mut s = session(LimitKind::Energy, 10_000, 15_000);
        s.last_meter_wh = Some(10_999);
        assert!(!s.limit_reached());
        s.last_meter_wh = Some(11_000);
        assert!(s.limit_reached());
    }

    #[test]
    fn amount_limit_reached_when_cost_meets_reservation() {
        let mut s = session(LimitKind::Amount, 15_000, 15_000);
        // 9 kWh at 1500/kWh = 13_500 < 15_000
        s.last_meter_wh = Some(10_000);
        assert!(!s.limit_reached());
        // 10 kWh = 15_000
        s.last_meter_wh = Some(11_000);
        assert!(s.limit_reached());
    }

    #[test]
    fn no_limit_check_before_meter_start() {
        let mut s = session(LimitKind::Energy, 10_000, 15_000);
        s.meter_start = None;
        s.last_meter_wh = Some(999_999);
        assert!(!s.limit_reached());
    }

    #[test]
    fn settlement_full_consumption() {
        let s = session(LimitKind::Energy, 10_000, 15_000);
        let out = s.settle(11_000);
        assert_eq!(
            out,
            Settlement {
                energy_wh: 10_000,
                amount_charged: 15_000,
                refund: 0
            }
        );
    }

    #[test]
    fn settlement_under_consumption_refunds_remainder() {
        let s = session(LimitKind::Energy, 10_000, 15_000);
        let out = s.settle(6_000);
        assert_eq!(out.energy_wh, 5_000);
        assert_eq!(out.amount_charged, 7_500);
        assert_eq!(out.refund, 7_500);
        assert_eq!(out.amount_charged + out.refund, s.reserved_amount);
    }

    #[test]
    fn settlement_caps_at_reservation_on_overrun() {
        let s = session(LimitKind::Energy, 10_000, 15_000);
        let out = s.settle(14_000); // 13 kWh delivered, cost would be 19_500
        assert_eq!(out.amount_charged, 15_000);
        assert_eq!(out.refund, 0);
    }

    #[test]
    fn settlement_with_backwards_meter_charges_nothing() {
        let s = session(LimitKind::Energy, 10_000, 15_000);
        let out = s.settle(500);
        assert_eq!(out.energy_wh, 0);
        assert_eq!(out.amount_charged, 0);
        assert_eq!(out.refund, 15_000);
    }
}
