//! Meter samples reported by stations during a transaction. Append-only.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct MeterSample {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Register reading in watt-hours.
    pub meter_wh: i64,
    pub measurand: String,
    pub unit: String,
}

/// The measurand carrying the energy register used for settlement.
pub const ENERGY_REGISTER: &str = "Energy.Active.Import.Register";
