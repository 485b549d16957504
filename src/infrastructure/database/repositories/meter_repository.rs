//! SeaORM implementation of MeterRepository.

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set,
};

use crate::domain::meter::MeterSample;
use crate::domain::MeterRepository;
use crate::infrastructure::database::entities::meter_sample;
use crate::support::CoreResult;

pub struct SeaOrmMeterRepository {
    db: DatabaseConnection,
}

impl SeaOrmMeterRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MeterRepository for SeaOrmMeterRepository {
    async fn append(&self, sample: MeterSample) -> CoreResult<()> {
        let model = meter_sample::ActiveModel {
            id: NotSet,
            session_id: Set(sample.session_id),
            timestamp: Set(sample.timestamp),
            meter_wh: Set(sample.meter_wh),
            measurand: Set(sample.measurand),
            unit: Set(sample.unit),
        };
        model.insert(&self.db).await?;
        Ok(())
    }

    async fn last_for_session(&self, session_id: &str) -> CoreResult<Option<MeterSample>> {
        let model = meter_sample::Entity::find()
            .filter(meter_sample::Column::SessionId.eq(session_id))
            .order_by_desc(meter_sample::Column::Timestamp)
            .one(&self.db)
            .await?;
        Ok(model.map(|m| MeterSample {
            session_id: m.session_id,
            timestamp: m.timestamp,
            meter_wh: m.meter_wh,
            measurand: m.measurand,
            unit: m.unit,
        }))
    }
}
