//! Database migrations module

pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_clients;
mod m20250301_000002_create_locations;
mod m20250301_000003_create_stations;
mod m20250301_000004_create_connectors;
mod m20250301_000005_create_tariff_rules;
mod m20250301_000006_create_charging_sessions;
mod m20250301_000007_create_meter_samples;
mod m20250301_000008_create_top_ups;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_clients::Migration),
            Box::new(m20250301_000002_create_locations::Migration),
            Box::new(m20250301_000003_create_stations::Migration),
            Box::new(m20250301_000004_create_connectors::Migration),
            Box::new(m20250301_000005_create_tariff_rules::Migration),
            Box::new(m20250301_000006_create_charging_sessions::Migration),
            Box::new(m20250301_000007_create_meter_samples::Migration),
            Box::new(m20250301_000008_create_top_ups::Migration),
        ]
    }
}
