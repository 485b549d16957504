//! Create top_ups table

use sea_orm_migration::prelude::*;

use super::m20250301_000001_create_clients::Clients;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TopUps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TopUps::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TopUps::ClientId).string().not_null())
                    .col(ColumnDef::new(TopUps::ProviderOrderId).string())
                    .col(ColumnDef::new(TopUps::IdempotencyKey).string())
                    .col(
                        ColumnDef::new(TopUps::AmountRequested)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TopUps::AmountPaid).big_integer())
                    .col(ColumnDef::new(TopUps::QrPayload).string())
                    .col(
                        ColumnDef::new(TopUps::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(TopUps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TopUps::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(TopUps::PaidAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_top_ups_client")
                            .from(TopUps::Table, TopUps::ClientId)
                            .to(Clients::Table, Clients::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_top_ups_provider_order")
                    .table(TopUps::Table)
                    .col(TopUps::ProviderOrderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_top_ups_status_expiry")
                    .table(TopUps::Table)
                    .col(TopUps::Status)
                    .col(TopUps::ExpiresAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TopUps::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum TopUps {
    Table,
    Id,
    ClientId,
    ProviderOrderId,
    IdempotencyKey,
    AmountRequested,
    AmountPaid,
    QrPayload,
    Status,
    CreatedAt,
    ExpiresAt,
    PaidAt,
}
