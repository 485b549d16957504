//! Charging session entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "charging_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub client_id: String,

    pub station_id: String,

    pub connector_id: i32,

    /// "energy" (limit_value in Wh) or "amount" (limit_value in minor units)
    pub limit_kind: String,

    pub limit_value: i64,

    /// Price snapshot at reservation time, minor units per kWh.
    pub price_per_kwh: i64,

    pub currency: String,

    /// OCPP idTag handed to the station in RemoteStartTransaction.
    #[sea_orm(unique)]
    pub id_tag: String,

    pub reserved_amount: i64,

    /// Server-assigned positive OCPP transaction id, bound at
    /// StartTransaction.
    #[sea_orm(nullable)]
    pub ocpp_tx_id: Option<i32>,

    #[sea_orm(nullable)]
    pub meter_start: Option<i64>,

    #[sea_orm(nullable)]
    pub meter_stop: Option<i64>,

    /// Latest meter reading seen in MeterValues (Wh).
    #[sea_orm(nullable)]
    pub last_meter_wh: Option<i64>,

    #[sea_orm(nullable)]
    pub energy_wh: Option<i64>,

    #[sea_orm(nullable)]
    pub amount_charged: Option<i64>,

    #[sea_orm(nullable)]
    pub refund_amount: Option<i64>,

    /// pending, starting, active, stopping, stopped, failed, expired
    pub status: String,

    pub created_at: DateTimeUtc,

    #[sea_orm(nullable)]
    pub started_at: Option<DateTimeUtc>,

    #[sea_orm(nullable)]
    pub stopped_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id"
    )]
    Client,

    #[sea_orm(
        belongs_to = "super::station::Entity",
        from = "Column::StationId",
        to = "super::station::Column::Id"
    )]
    Station,

    #[sea_orm(has_many = "super::meter_sample::Entity")]
    MeterSamples,
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl Related<super::station::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Station.def()
    }
}

impl Related<super::meter_sample::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeterSamples.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
