//! SeaORM implementation of TariffRepository.
//!
//! Resolution order: station price override, then the highest-priority
//! applicable rule (station-specific beating global), then the
//! configured default.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::domain::tariff::{EffectivePrice, TariffRule};
use crate::domain::TariffRepository;
use crate::infrastructure::database::entities::{station, tariff_rule};
use crate::support::CoreResult;

pub struct SeaOrmTariffRepository {
    db: DatabaseConnection,
    default_price_per_kwh: i64,
    currency: String,
}

impl SeaOrmTariffRepository {
    pub fn new(db: DatabaseConnection, default_price_per_kwh: i64, currency: String) -> Self {
        Self {
            db,
            default_price_per_kwh,
            currency,
        }
    }
}

fn rule_to_domain(m: tariff_rule::Model) -> TariffRule {
    TariffRule {
        id: m.id,
        station_id: m.station_id,
        price_per_kwh: m.price_per_kwh,
        priority: m.priority,
        active: m.active,
        valid_from: m.valid_from,
        valid_until: m.valid_until,
    }
}

#[async_trait]
impl TariffRepository for SeaOrmTariffRepository {
    async fn effective_price(
        &self,
        station_id: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<EffectivePrice> {
        if let Some(station) = station::Entity::find_by_id(station_id).one(&self.db).await? {
            if let Some(price) = station.price_per_kwh {
                return Ok(EffectivePrice {
                    price_per_kwh: price,
                    currency: self.currency.clone(),
                });
            }
        }

        let candidates = tariff_rule::Entity::find()
            .filter(tariff_rule::Column::Active.eq(true))
            .filter(
                Condition::any()
                    .add(tariff_rule::Column::StationId.eq(station_id))
                    .add(tariff_rule::Column::StationId.is_null()),
            )
            .order_by_desc(tariff_rule::Column::Priority)
            .all(&self.db)
            .await?;

        let best = candidates
            .into_iter()
            .map(rule_to_domain)
            .filter(|rule| rule.applies_at(at))
            // station-specific beats global at equal priority
            .max_by_key(|rule| (rule.priority, rule.station_id.is_some()));

        Ok(EffectivePrice {
            price_per_kwh: best
                .map(|rule| rule.price_per_kwh)
                .unwrap_or(self.default_price_per_kwh),
            currency: self.currency.clone(),
        })
    }
}
