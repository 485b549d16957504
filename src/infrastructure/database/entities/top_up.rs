//! Balance top-up (invoice) entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "top_ups")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub client_id: String,

    /// Provider-assigned order id; set once the invoice is created
    /// upstream.
    #[sea_orm(nullable)]
    pub provider_order_id: Option<String>,

    /// Client-supplied Idempotency-Key this invoice was created under.
    #[sea_orm(nullable)]
    pub idempotency_key: Option<String>,

    pub amount_requested: i64,

    #[sea_orm(nullable)]
    pub amount_paid: Option<i64>,

    #[sea_orm(nullable)]
    pub qr_payload: Option<String>,

    /// pending, approved, expired, failed. Approved is terminal.
    pub status: String,

    pub created_at: DateTimeUtc,

    pub expires_at: DateTimeUtc,

    #[sea_orm(nullable)]
    pub paid_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::client::Entity",
        from = "Column::ClientId",
        to = "super::client::Column::Id"
    )]
    Client,
}

impl Related<super::client::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Client.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
