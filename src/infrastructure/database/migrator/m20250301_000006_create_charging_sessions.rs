//! Create charging_sessions table

use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_clients::Clients;
use super::m20250301_000003_create_stations::Stations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ChargingSessions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ChargingSessions::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ChargingSessions::ClientId).string().not_null())
                    .col(
                        ColumnDef::new(ChargingSessions::StationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::ConnectorId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::LimitKind)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::LimitValue)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::PricePerKwh)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChargingSessions::Currency).string().not_null())
                    .col(
                        ColumnDef::new(ChargingSessions::IdTag)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::ReservedAmount)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChargingSessions::OcppTxId).integer())
                    .col(ColumnDef::new(ChargingSessions::MeterStart).big_integer())
                    .col(ColumnDef::new(ChargingSessions::MeterStop).big_integer())
                    .col(ColumnDef::new(ChargingSessions::LastMeterWh).big_integer())
                    .col(ColumnDef::new(ChargingSessions::EnergyWh).big_integer())
                    .col(ColumnDef::new(ChargingSessions::AmountCharged).big_integer())
                    .col(ColumnDef::new(ChargingSessions::RefundAmount).big_integer())
                    .col(
                        ColumnDef::new(ChargingSessions::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(ChargingSessions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ChargingSessions::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(ChargingSessions::StoppedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_client")
                            .from(ChargingSessions::Table, ChargingSessions::ClientId)
                            .to(Clients::Table, Clients::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_station")
                            .from(ChargingSessions::Table, ChargingSessions::StationId)
                            .to(Stations::Table, Stations::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_client_status")
                    .table(ChargingSessions::Table)
                    .col(ChargingSessions::ClientId)
                    .col(ChargingSessions::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_station_connector")
                    .table(ChargingSessions::Table)
                    .col(ChargingSessions::StationId)
                    .col(ChargingSessions::ConnectorId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_ocpp_tx")
                    .table(ChargingSessions::Table)
                    .col(ChargingSessions::OcppTxId)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ChargingSessions::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum ChargingSessions {
    Table,
    Id,
    ClientId,
    StationId,
    ConnectorId,
    LimitKind,
    LimitValue,
    PricePerKwh,
    Currency,
    IdTag,
    ReservedAmount,
    OcppTxId,
    MeterStart,
    MeterStop,
    LastMeterWh,
    EnergyWh,
    AmountCharged,
    RefundAmount,
    Status,
    CreatedAt,
    StartedAt,
    StoppedAt,
}
