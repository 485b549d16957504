//! Meter sample entity. Append-only.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "ocpp_meter_samples")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub session_id: String,

    pub timestamp: DateTimeUtc,

    /// Register reading in watt-hours.
    pub meter_wh: i64,

    pub measurand: String,

    pub unit: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::charging_session::Entity",
        from = "Column::SessionId",
        to = "super::charging_session::Column::Id"
    )]
    ChargingSession,
}

impl Related<super::charging_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChargingSession.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
