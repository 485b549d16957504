//! Create ocpp_meter_samples table

use sea_orm_migration::prelude::*;

use super::m20250301_000006_create_charging_sessions::ChargingSessions;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OcppMeterSamples::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OcppMeterSamples::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(OcppMeterSamples::SessionId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OcppMeterSamples::Timestamp)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OcppMeterSamples::MeterWh)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(OcppMeterSamples::Measurand)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OcppMeterSamples::Unit).string().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_meter_samples_session")
                            .from(OcppMeterSamples::Table, OcppMeterSamples::SessionId)
                            .to(ChargingSessions::Table, ChargingSessions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_meter_samples_session")
                    .table(OcppMeterSamples::Table)
                    .col(OcppMeterSamples::SessionId)
                    .col(OcppMeterSamples::Timestamp)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OcppMeterSamples::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum OcppMeterSamples {
    Table,
    Id,
    SessionId,
    Timestamp,
    MeterWh,
    Measurand,
    Unit,
}
