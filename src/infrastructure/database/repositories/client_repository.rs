//! SeaORM implementation of ClientRepository.
//!
//! Balance mutations are expressed as conditional `UPDATE` statements so
//! the database enforces `balance >= 0`; nothing here reads a balance
//! into memory and writes it back.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use crate::domain::client::Client;
use crate::domain::ClientRepository;
use crate::infrastructure::database::entities::client;
use crate::support::{CoreError, CoreResult};

pub struct SeaOrmClientRepository {
    db: DatabaseConnection,
}

impl SeaOrmClientRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: client::Model) -> Client {
    Client {
        id: m.id,
        balance: m.balance,
        currency: m.currency,
        created_at: m.created_at,
    }
}

#[async_trait]
impl ClientRepository for SeaOrmClientRepository {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Client>> {
        let model = client::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(model_to_domain))
    }

    async fn insert(&self, c: Client) -> CoreResult<()> {
        let model = client::ActiveModel {
            id: Set(c.id),
            balance: Set(c.balance),
            currency: Set(c.currency),
            created_at: Set(c.created_at),
        };
        model.insert(&self.db).await?;
        Ok(())
    }

    async fn try_reserve(&self, client_id: &str, amount: i64) -> CoreResult<bool> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "reserve amount must be non-negative".into(),
            ));
        }
        let result = client::Entity::update_many()
            .col_expr(
                client::Column::Balance,
                Expr::col(client::Column::Balance).sub(amount),
            )
            .filter(client::Column::Id.eq(client_id))
            .filter(client::Column::Balance.gte(amount))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn credit(&self, client_id: &str, amount: i64) -> CoreResult<()> {
        if amount < 0 {
            return Err(CoreError::InvalidArgument(
                "credit amount must be non-negative".into(),
            ));
        }
        let result = client::Entity::update_many()
            .col_expr(
                client::Column::Balance,
                Expr::col(client::Column::Balance).add(amount),
            )
            .filter(client::Column::Id.eq(client_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(CoreError::not_found("Client", "id", client_id));
        }
        Ok(())
    }
}
