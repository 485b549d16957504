//! Heartbeat handler

use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::HeartbeatResponse;
use crate::domain::station::StationStatus;
use crate::support::CoreResult;

pub async fn handle(handler: &OcppSessionHandler) -> CoreResult<Value> {
    let now = Utc::now();
    debug!(station_id = handler.station_id.as_str(), "Heartbeat");

    let repos = handler.engine().repos();
    repos
        .stations()
        .touch_heartbeat(&handler.station_id, now)
        .await?;

    // a heartbeat from a station previously swept offline revives it
    if let Some(station) = repos.stations().find_by_id(&handler.station_id).await? {
        if matches!(station.status, StationStatus::Offline | StationStatus::Unknown) {
            repos
                .stations()
                .update_status(&handler.station_id, StationStatus::Available)
                .await?;
        }
    }

    handler.registry().refresh_presence(&handler.station_id).await?;

    Ok(to_payload(HeartbeatResponse { current_time: now }))
}
