//! Station entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stations")]
pub struct Model {
    /// Free-form identifier presented by the station at handshake.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    #[sea_orm(nullable)]
    pub location_id: Option<String>,

    /// unknown, available, occupied, faulted, unavailable, offline
    pub status: String,

    #[sea_orm(nullable)]
    pub last_heartbeat_at: Option<DateTimeUtc>,

    // BootNotification identity, flattened

    #[sea_orm(nullable)]
    pub boot_vendor: Option<String>,

    #[sea_orm(nullable)]
    pub boot_model: Option<String>,

    #[sea_orm(nullable)]
    pub boot_serial_number: Option<String>,

    #[sea_orm(nullable)]
    pub boot_firmware_version: Option<String>,

    /// Per-station price override, minor units per kWh.
    #[sea_orm(nullable)]
    pub price_per_kwh: Option<i64>,

    pub registered_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::location::Entity",
        from = "Column::LocationId",
        to = "super::location::Column::Id"
    )]
    Location,

    #[sea_orm(has_many = "super::connector::Entity")]
    Connectors,
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

impl Related<super::connector::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Connectors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
