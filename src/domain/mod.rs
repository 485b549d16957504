//! Core business entities, OCPP payload types, and repository traits.

pub mod client;
pub mod meter;
pub mod ocpp;
pub mod repositories;
pub mod session;
pub mod station;
pub mod tariff;
pub mod topup;

pub use client::Client;
pub use meter::MeterSample;
pub use repositories::{
    ClientRepository, MeterRepository, RepositoryProvider, SessionClose, SessionRepository,
    StationRepository, TariffRepository, TopUpRepository,
};
pub use session::{cost_of_energy, ChargingSession, LimitKind, SessionStatus, Settlement};
pub use station::{BootInfo, Connector, ConnectorStatus, Station, StationStatus};
pub use tariff::{EffectivePrice, TariffRule};
pub use topup::{TopUp, TopUpStatus};
