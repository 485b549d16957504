//! SeaORM implementation of TopUpRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};

use crate::domain::topup::{TopUp, TopUpStatus};
use crate::domain::TopUpRepository;
use crate::infrastructure::database::entities::{client, top_up};
use crate::support::{CoreError, CoreResult};

pub struct SeaOrmTopUpRepository {
    db: DatabaseConnection,
}

impl SeaOrmTopUpRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: top_up::Model) -> CoreResult<TopUp> {
    let status = TopUpStatus::parse(&m.status)
        .ok_or_else(|| CoreError::Internal(format!("bad top_up status in row: {}", m.status)))?;
    Ok(TopUp {
        id: m.id,
        client_id: m.client_id,
        provider_order_id: m.provider_order_id,
        idempotency_key: m.idempotency_key,
        amount_requested: m.amount_requested,
        amount_paid: m.amount_paid,
        qr_payload: m.qr_payload,
        status,
        created_at: m.created_at,
        expires_at: m.expires_at,
        paid_at: m.paid_at,
    })
}

#[async_trait]
impl TopUpRepository for SeaOrmTopUpRepository {
    async fn insert(&self, t: TopUp) -> CoreResult<()> {
        let model = top_up::ActiveModel {
            id: Set(t.id),
            client_id: Set(t.client_id),
            provider_order_id: Set(t.provider_order_id),
            idempotency_key: Set(t.idempotency_key),
            amount_requested: Set(t.amount_requested),
            amount_paid: Set(t.amount_paid),
            qr_payload: Set(t.qr_payload),
            status: Set(t.status.as_str().to_string()),
            created_at: Set(t.created_at),
            expires_at: Set(t.expires_at),
            paid_at: Set(t.paid_at),
        };
        model.insert(&self.db).await?;
        Ok(())
    }

    async fn update_provider_fields(
        &self,
        id: &str,
        provider_order_id: &str,
        qr_payload: Option<String>,
    ) -> CoreResult<()> {
        top_up::Entity::update_many()
            .col_expr(
                top_up::Column::ProviderOrderId,
                Expr::value(Some(provider_order_id)),
            )
            .col_expr(top_up::Column::QrPayload, Expr::value(qr_payload))
            .filter(top_up::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<TopUp>> {
        let model = top_up::Entity::find_by_id(id).one(&self.db).await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_by_provider_order_id(&self, order_id: &str) -> CoreResult<Option<TopUp>> {
        let model = top_up::Entity::find()
            .filter(top_up::Column::ProviderOrderId.eq(order_id))
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        client_id: &str,
        key: &str,
        since: DateTime<Utc>,
    ) -> CoreResult<Option<TopUp>> {
        let model = top_up::Entity::find()
            .filter(top_up::Column::ClientId.eq(client_id))
            .filter(top_up::Column::IdempotencyKey.eq(key))
            .filter(top_up::Column::CreatedAt.gte(since))
            .order_by_desc(top_up::Column::CreatedAt)
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn approve_and_credit(
        &self,
        topup_id: &str,
        paid_amount: i64,
        paid_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let txn = self.db.begin().await?;

        let Some(row) = top_up::Entity::find_by_id(topup_id).one(&txn).await? else {
            txn.rollback().await?;
            return Err(CoreError::not_found("TopUp", "id", topup_id));
        };

        // Approval is monotonic: only rows not yet approved move. An
        // expired row moving back to approved is intentional — the money
        // arrived, however late.
        let result = top_up::Entity::update_many()
            .col_expr(
                top_up::Column::Status,
                Expr::value(TopUpStatus::Approved.as_str()),
            )
            .col_expr(top_up::Column::AmountPaid, Expr::value(Some(paid_amount)))
            .col_expr(top_up::Column::PaidAt, Expr::value(Some(paid_at)))
            .filter(top_up::Column::Id.eq(topup_id))
            .filter(top_up::Column::Status.ne(TopUpStatus::Approved.as_str()))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            txn.rollback().await?;
            return Ok(false);
        }

        client::Entity::update_many()
            .col_expr(
                client::Column::Balance,
                Expr::col(client::Column::Balance).add(paid_amount),
            )
            .filter(client::Column::Id.eq(row.client_id.as_str()))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(true)
    }

    async fn mark_failed(&self, topup_id: &str) -> CoreResult<bool> {
        let result = top_up::Entity::update_many()
            .col_expr(
                top_up::Column::Status,
                Expr::value(TopUpStatus::Failed.as_str()),
            )
            .filter(top_up::Column::Id.eq(topup_id))
            .filter(top_up::Column::Status.eq(TopUpStatus::Pending.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn expire_pending(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let result = top_up::Entity::update_many()
            .col_expr(
                top_up::Column::Status,
                Expr::value(TopUpStatus::Expired.as_str()),
            )
            .filter(top_up::Column::Status.eq(TopUpStatus::Pending.as_str()))
            .filter(top_up::Column::ExpiresAt.lt(now))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
