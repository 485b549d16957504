//! SeaORM entity definitions, one module per table.

pub mod charging_session;
pub mod client;
pub mod connector;
pub mod location;
pub mod meter_sample;
pub mod station;
pub mod tariff_rule;
pub mod top_up;
