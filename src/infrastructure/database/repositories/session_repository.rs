//! SeaORM implementation of SessionRepository.
//!
//! Status moves are compare-and-set `UPDATE … WHERE status IN (…)`
//! statements; the row-level atomicity is what serializes racing
//! writers (REST stop vs station StopTransaction vs reconciler).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};

use crate::domain::session::{ChargingSession, LimitKind, SessionStatus};
use crate::domain::{SessionClose, SessionRepository};
use crate::infrastructure::database::entities::{charging_session, client};
use crate::support::{CoreError, CoreResult};

pub struct SeaOrmSessionRepository {
    db: DatabaseConnection,
}

impl SeaOrmSessionRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn open_status_strings() -> Vec<&'static str> {
    SessionStatus::OPEN.iter().map(|s| s.as_str()).collect()
}

fn model_to_domain(m: charging_session::Model) -> CoreResult<ChargingSession> {
    let limit_kind = LimitKind::parse(&m.limit_kind)
        .ok_or_else(|| CoreError::Internal(format!("bad limit_kind in row: {}", m.limit_kind)))?;
    let status = SessionStatus::parse(&m.status)
        .ok_or_else(|| CoreError::Internal(format!("bad session status in row: {}", m.status)))?;
    Ok(ChargingSession {
        id: m.id,
        client_id: m.client_id,
        station_id: m.station_id,
        connector_id: m.connector_id,
        limit_kind,
        limit_value: m.limit_value,
        price_per_kwh: m.price_per_kwh,
        currency: m.currency,
        id_tag: m.id_tag,
        reserved_amount: m.reserved_amount,
        ocpp_tx_id: m.ocpp_tx_id,
        meter_start: m.meter_start,
        meter_stop: m.meter_stop,
        last_meter_wh: m.last_meter_wh,
        energy_wh: m.energy_wh,
        amount_charged: m.amount_charged,
        refund_amount: m.refund_amount,
        status,
        created_at: m.created_at,
        started_at: m.started_at,
        stopped_at: m.stopped_at,
    })
}

fn collect(models: Vec<charging_session::Model>) -> CoreResult<Vec<ChargingSession>> {
    models.into_iter().map(model_to_domain).collect()
}

#[async_trait]
impl SessionRepository for SeaOrmSessionRepository {
    async fn insert(&self, s: ChargingSession) -> CoreResult<()> {
        let txn = self.db.begin().await?;

        // one open session per client and per connector, checked inside
        // the insert transaction
        if s.status.is_open() {
            let client_open = charging_session::Entity::find()
                .filter(charging_session::Column::ClientId.eq(s.client_id.as_str()))
                .filter(charging_session::Column::Status.is_in(open_status_strings()))
                .one(&txn)
                .await?;
            if client_open.is_some() {
                txn.rollback().await?;
                return Err(CoreError::ClientBusy);
            }
            let connector_open = charging_session::Entity::find()
                .filter(charging_session::Column::StationId.eq(s.station_id.as_str()))
                .filter(charging_session::Column::ConnectorId.eq(s.connector_id))
                .filter(charging_session::Column::Status.is_in(open_status_strings()))
                .one(&txn)
                .await?;
            if connector_open.is_some() {
                txn.rollback().await?;
                return Err(CoreError::ConnectorBusy {
                    station_id: s.station_id.clone(),
                    connector_id: s.connector_id,
                });
            }
        }

        let model = charging_session::ActiveModel {
            id: Set(s.id),
            client_id: Set(s.client_id),
            station_id: Set(s.station_id),
            connector_id: Set(s.connector_id),
            limit_kind: Set(s.limit_kind.as_str().to_string()),
            limit_value: Set(s.limit_value),
            price_per_kwh: Set(s.price_per_kwh),
            currency: Set(s.currency),
            id_tag: Set(s.id_tag),
            reserved_amount: Set(s.reserved_amount),
            ocpp_tx_id: Set(s.ocpp_tx_id),
            meter_start: Set(s.meter_start),
            meter_stop: Set(s.meter_stop),
            last_meter_wh: Set(s.last_meter_wh),
            energy_wh: Set(s.energy_wh),
            amount_charged: Set(s.amount_charged),
            refund_amount: Set(s.refund_amount),
            status: Set(s.status.as_str().to_string()),
            created_at: Set(s.created_at),
            started_at: Set(s.started_at),
            stopped_at: Set(s.stopped_at),
        };
        model.insert(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> CoreResult<Option<ChargingSession>> {
        let model = charging_session::Entity::find_by_id(id).one(&self.db).await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_open_for_client(&self, client_id: &str) -> CoreResult<Option<ChargingSession>> {
        let model = charging_session::Entity::find()
            .filter(charging_session::Column::ClientId.eq(client_id))
            .filter(charging_session::Column::Status.is_in(open_status_strings()))
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_open_for_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<ChargingSession>> {
        let model = charging_session::Entity::find()
            .filter(charging_session::Column::StationId.eq(station_id))
            .filter(charging_session::Column::ConnectorId.eq(connector_id))
            .filter(charging_session::Column::Status.is_in(open_status_strings()))
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_starting_by_id_tag(
        &self,
        id_tag: &str,
    ) -> CoreResult<Option<ChargingSession>> {
        let model = charging_session::Entity::find()
            .filter(charging_session::Column::IdTag.eq(id_tag))
            .filter(charging_session::Column::Status.eq(SessionStatus::Starting.as_str()))
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn find_by_tx_id(&self, ocpp_tx_id: i32) -> CoreResult<Option<ChargingSession>> {
        let model = charging_session::Entity::find()
            .filter(charging_session::Column::OcppTxId.eq(ocpp_tx_id))
            .one(&self.db)
            .await?;
        model.map(model_to_domain).transpose()
    }

    async fn next_ocpp_tx_id(&self) -> CoreResult<i32> {
        let highest = charging_session::Entity::find()
            .filter(charging_session::Column::OcppTxId.is_not_null())
            .order_by_desc(charging_session::Column::OcppTxId)
            .one(&self.db)
            .await?;
        Ok(highest.and_then(|m| m.ocpp_tx_id).unwrap_or(0) + 1)
    }

    async fn transition(
        &self,
        id: &str,
        from: &[SessionStatus],
        to: SessionStatus,
    ) -> CoreResult<bool> {
        let from_strings: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let result = charging_session::Entity::update_many()
            .col_expr(charging_session::Column::Status, Expr::value(to.as_str()))
            .filter(charging_session::Column::Id.eq(id))
            .filter(charging_session::Column::Status.is_in(from_strings))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn bind_start(
        &self,
        id: &str,
        ocpp_tx_id: i32,
        meter_start: i64,
        started_at: DateTime<Utc>,
    ) -> CoreResult<bool> {
        let result = charging_session::Entity::update_many()
            .col_expr(
                charging_session::Column::Status,
                Expr::value(SessionStatus::Active.as_str()),
            )
            .col_expr(charging_session::Column::OcppTxId, Expr::value(Some(ocpp_tx_id)))
            .col_expr(
                charging_session::Column::MeterStart,
                Expr::value(Some(meter_start)),
            )
            .col_expr(
                charging_session::Column::StartedAt,
                Expr::value(Some(started_at)),
            )
            .filter(charging_session::Column::Id.eq(id))
            .filter(charging_session::Column::Status.eq(SessionStatus::Starting.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn record_meter(&self, id: &str, last_meter_wh: i64) -> CoreResult<()> {
        charging_session::Entity::update_many()
            .col_expr(
                charging_session::Column::LastMeterWh,
                Expr::value(Some(last_meter_wh)),
            )
            .filter(charging_session::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn close(&self, id: &str, close: SessionClose) -> CoreResult<bool> {
        let txn = self.db.begin().await?;

        let Some(row) = charging_session::Entity::find_by_id(id).one(&txn).await? else {
            txn.rollback().await?;
            return Err(CoreError::not_found("ChargingSession", "id", id));
        };

        let result = charging_session::Entity::update_many()
            .col_expr(
                charging_session::Column::Status,
                Expr::value(close.status.as_str()),
            )
            .col_expr(
                charging_session::Column::MeterStop,
                Expr::value(close.meter_stop),
            )
            .col_expr(
                charging_session::Column::EnergyWh,
                Expr::value(Some(close.energy_wh)),
            )
            .col_expr(
                charging_session::Column::AmountCharged,
                Expr::value(Some(close.amount_charged)),
            )
            .col_expr(
                charging_session::Column::RefundAmount,
                Expr::value(Some(close.refund)),
            )
            .col_expr(
                charging_session::Column::StoppedAt,
                Expr::value(Some(close.stopped_at)),
            )
            .filter(charging_session::Column::Id.eq(id))
            .filter(charging_session::Column::Status.is_in(open_status_strings()))
            .exec(&txn)
            .await?;

        if result.rows_affected != 1 {
            // already terminal; nothing to settle
            txn.rollback().await?;
            return Ok(false);
        }

        if close.refund > 0 {
            client::Entity::update_many()
                .col_expr(
                    client::Column::Balance,
                    Expr::col(client::Column::Balance).add(close.refund),
                )
                .filter(client::Column::Id.eq(row.client_id.as_str()))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(true)
    }

    async fn find_hung_starting(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<ChargingSession>> {
        let models = charging_session::Entity::find()
            .filter(charging_session::Column::Status.eq(SessionStatus::Starting.as_str()))
            .filter(charging_session::Column::OcppTxId.is_null())
            .filter(charging_session::Column::CreatedAt.lt(cutoff))
            .all(&self.db)
            .await?;
        collect(models)
    }

    async fn find_active_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> CoreResult<Vec<ChargingSession>> {
        let models = charging_session::Entity::find()
            .filter(charging_session::Column::Status.eq(SessionStatus::Active.as_str()))
            .filter(charging_session::Column::CreatedAt.lt(cutoff))
            .all(&self.db)
            .await?;
        collect(models)
    }
}
