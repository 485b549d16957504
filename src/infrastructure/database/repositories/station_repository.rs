//! SeaORM implementation of StationRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};

use crate::domain::station::{BootInfo, Connector, ConnectorStatus, Station, StationStatus};
use crate::domain::StationRepository;
use crate::infrastructure::database::entities::{connector, station};
use crate::support::CoreResult;

pub struct SeaOrmStationRepository {
    db: DatabaseConnection,
}

impl SeaOrmStationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn model_to_domain(m: station::Model) -> Station {
    let boot_info = m.boot_vendor.as_ref().map(|vendor| BootInfo {
        vendor: vendor.clone(),
        model: m.boot_model.clone().unwrap_or_default(),
        serial_number: m.boot_serial_number.clone(),
        firmware_version: m.boot_firmware_version.clone(),
    });
    Station {
        id: m.id,
        location_id: m.location_id,
        status: StationStatus::parse(&m.status),
        last_heartbeat_at: m.last_heartbeat_at,
        boot_info,
        price_per_kwh: m.price_per_kwh,
        registered_at: m.registered_at,
    }
}

fn connector_to_domain(m: connector::Model) -> Connector {
    Connector {
        station_id: m.station_id,
        connector_id: m.connector_id,
        status: ConnectorStatus::parse(&m.status),
        updated_at: m.updated_at,
    }
}

#[async_trait]
impl StationRepository for SeaOrmStationRepository {
    async fn find_by_id(&self, id: &str) -> CoreResult<Option<Station>> {
        let model = station::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(model_to_domain))
    }

    async fn record_boot(&self, station_id: &str, info: BootInfo) -> CoreResult<()> {
        let existing = station::Entity::find_by_id(station_id).one(&self.db).await?;
        let now = Utc::now();

        match existing {
            Some(model) => {
                let mut active: station::ActiveModel = model.into();
                active.boot_vendor = Set(Some(info.vendor));
                active.boot_model = Set(Some(info.model));
                active.boot_serial_number = Set(info.serial_number);
                active.boot_firmware_version = Set(info.firmware_version);
                active.last_heartbeat_at = Set(Some(now));
                active.update(&self.db).await?;
            }
            None => {
                let model = station::ActiveModel {
                    id: Set(station_id.to_string()),
                    location_id: Set(None),
                    status: Set(StationStatus::Unknown.as_str().to_string()),
                    last_heartbeat_at: Set(Some(now)),
                    boot_vendor: Set(Some(info.vendor)),
                    boot_model: Set(Some(info.model)),
                    boot_serial_number: Set(info.serial_number),
                    boot_firmware_version: Set(info.firmware_version),
                    price_per_kwh: Set(None),
                    registered_at: Set(now),
                };
                model.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn touch_heartbeat(&self, station_id: &str, at: DateTime<Utc>) -> CoreResult<()> {
        station::Entity::update_many()
            .col_expr(station::Column::LastHeartbeatAt, Expr::value(Some(at)))
            .filter(station::Column::Id.eq(station_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn update_status(&self, station_id: &str, status: StationStatus) -> CoreResult<()> {
        station::Entity::update_many()
            .col_expr(station::Column::Status, Expr::value(status.as_str()))
            .filter(station::Column::Id.eq(station_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn find_connector(
        &self,
        station_id: &str,
        connector_id: i32,
    ) -> CoreResult<Option<Connector>> {
        let model = connector::Entity::find_by_id((station_id.to_string(), connector_id))
            .one(&self.db)
            .await?;
        Ok(model.map(connector_to_domain))
    }

    async fn upsert_connector_status(
        &self,
        station_id: &str,
        connector_id: i32,
        status: ConnectorStatus,
    ) -> CoreResult<()> {
        let existing = connector::Entity::find_by_id((station_id.to_string(), connector_id))
            .one(&self.db)
            .await?;
        let now = Utc::now();

        match existing {
            Some(model) => {
                let mut active: connector::ActiveModel = model.into();
                active.status = Set(status.as_str().to_string());
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let model = connector::ActiveModel {
                    station_id: Set(station_id.to_string()),
                    connector_id: Set(connector_id),
                    status: Set(status.as_str().to_string()),
                    updated_at: Set(now),
                };
                model.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn list_connectors(&self, station_id: &str) -> CoreResult<Vec<Connector>> {
        let models = connector::Entity::find()
            .filter(connector::Column::StationId.eq(station_id))
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(connector_to_domain).collect())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Station>> {
        let models = station::Entity::find()
            .filter(station::Column::LastHeartbeatAt.lt(cutoff))
            .filter(station::Column::Status.ne(StationStatus::Offline.as_str()))
            .all(&self.db)
            .await?;
        Ok(models.into_iter().map(model_to_domain).collect())
    }
}
