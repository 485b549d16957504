//! Tariff rule entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tariff_rules")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// When set, the rule applies only to this station; NULL rules are
    /// global defaults.
    #[sea_orm(nullable)]
    pub station_id: Option<String>,

    /// Minor units per kWh.
    pub price_per_kwh: i64,

    pub priority: i32,

    pub active: bool,

    #[sea_orm(nullable)]
    pub valid_from: Option<DateTimeUtc>,

    #[sea_orm(nullable)]
    pub valid_until: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
