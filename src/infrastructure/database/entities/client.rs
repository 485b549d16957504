//! Client (prepaid account) entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "clients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// Prepaid balance, minor currency units. Only ever mutated by
    /// conditional updates.
    pub balance: i64,

    /// ISO 4217 code.
    pub currency: String,

    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::charging_session::Entity")]
    ChargingSessions,

    #[sea_orm(has_many = "super::top_up::Entity")]
    TopUps,
}

impl Related<super::charging_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChargingSessions.def()
    }
}

impl Related<super::top_up::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TopUps.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
