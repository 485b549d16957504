//! SeaORM repository implementations.

pub mod client_repository;
pub mod meter_repository;
pub mod session_repository;
pub mod station_repository;
pub mod tariff_repository;
pub mod topup_repository;

use sea_orm::DatabaseConnection;

use crate::config::BillingConfig;
use crate::domain::{
    ClientRepository, MeterRepository, RepositoryProvider, SessionRepository, StationRepository,
    TariffRepository, TopUpRepository,
};

use client_repository::SeaOrmClientRepository;
use meter_repository::SeaOrmMeterRepository;
use session_repository::SeaOrmSessionRepository;
use station_repository::SeaOrmStationRepository;
use tariff_repository::SeaOrmTariffRepository;
use topup_repository::SeaOrmTopUpRepository;

/// Unified repository provider backed by one SeaORM connection pool.
pub struct SeaOrmRepositoryProvider {
    clients: SeaOrmClientRepository,
    stations: SeaOrmStationRepository,
    sessions: SeaOrmSessionRepository,
    top_ups: SeaOrmTopUpRepository,
    meters: SeaOrmMeterRepository,
    tariffs: SeaOrmTariffRepository,
}

impl SeaOrmRepositoryProvider {
    pub fn new(db: DatabaseConnection, billing: &BillingConfig) -> Self {
        Self {
            clients: SeaOrmClientRepository::new(db.clone()),
            stations: SeaOrmStationRepository::new(db.clone()),
            sessions: SeaOrmSessionRepository::new(db.clone()),
            top_ups: SeaOrmTopUpRepository::new(db.clone()),
            meters: SeaOrmMeterRepository::new(db.clone()),
            tariffs: SeaOrmTariffRepository::new(
                db,
                billing.default_tariff_price_per_kwh,
                billing.default_currency.clone(),
            ),
        }
    }
}

impl RepositoryProvider for SeaOrmRepositoryProvider {
    fn clients(&self) -> &dyn ClientRepository {
        &self.clients
    }

    fn stations(&self) -> &dyn StationRepository {
        &self.stations
    }

    fn sessions(&self) -> &dyn SessionRepository {
        &self.sessions
    }

    fn top_ups(&self) -> &dyn TopUpRepository {
        &self.top_ups
    }

    fn meters(&self) -> &dyn MeterRepository {
        &self.meters
    }

    fn tariffs(&self) -> &dyn TariffRepository {
        &self.tariffs
    }
}
