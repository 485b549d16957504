//! Tariff rules and price resolution.

use chrono::{DateTime, Utc};

/// A pricing rule. Station-specific rules (matching `station_id`) beat
/// global ones; among candidates the highest priority wins.
#[derive(Debug, Clone)]
pub struct TariffRule {
    pub id: i32,
    pub station_id: Option<String>,
    /// Minor units per kWh.
    pub price_per_kwh: i64,
    pub priority: i32,
    pub active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl TariffRule {
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if at >= until {
                return false;
            }
        }
        true
    }
}

/// The single effective price used by the lifecycle engine's hot path.
#[derive(Debug, Clone)]
pub struct EffectivePrice {
    pub price_per_kwh: i64,
    pub currency: String,
}
