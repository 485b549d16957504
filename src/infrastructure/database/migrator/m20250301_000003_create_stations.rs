//! Create stations table

use sea_orm_migration::prelude::*;

use super::m20250301_000002_create_locations::Locations;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Stations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Stations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Stations::LocationId).string())
                    .col(
                        ColumnDef::new(Stations::Status)
                            .string()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(ColumnDef::new(Stations::LastHeartbeatAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Stations::BootVendor).string())
                    .col(ColumnDef::new(Stations::BootModel).string())
                    .col(ColumnDef::new(Stations::BootSerialNumber).string())
                    .col(ColumnDef::new(Stations::BootFirmwareVersion).string())
                    .col(ColumnDef::new(Stations::PricePerKwh).big_integer())
                    .col(
                        ColumnDef::new(Stations::RegisteredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stations_location")
                            .from(Stations::Table, Stations::LocationId)
                            .to(Locations::Table, Locations::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stations_status")
                    .table(Stations::Table)
                    .col(Stations::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Stations::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Stations {
    Table,
    Id,
    LocationId,
    Status,
    LastHeartbeatAt,
    BootVendor,
    BootModel,
    BootSerialNumber,
    BootFirmwareVersion,
    PricePerKwh,
    RegisteredAt,
}
