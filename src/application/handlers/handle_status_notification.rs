//! StatusNotification handler

use serde_json::Value;
use tracing::info;

use super::OcppSessionHandler;
use crate::domain::ocpp::StatusNotificationRequest;
use crate::domain::station::{ConnectorStatus, StationStatus};
use crate::support::CoreResult;

pub async fn handle(
    handler: &OcppSessionHandler,
    request: StatusNotificationRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        connector_id = request.connector_id,
        status = request.status.as_str(),
        error_code = request.error_code.as_str(),
        "StatusNotification"
    );

    let repos = handler.engine().repos();

    if request.connector_id == 0 {
        // connector 0 addresses the station as a whole
        let status = match request.status.as_str() {
            "Available" => StationStatus::Available,
            "Faulted" => StationStatus::Faulted,
            "Unavailable" => StationStatus::Unavailable,
            _ => StationStatus::Occupied,
        };
        repos
            .stations()
            .update_status(&handler.station_id, status)
            .await?;
        return Ok(Value::Object(Default::default()));
    }

    let status = ConnectorStatus::from_ocpp(&request.status);
    repos
        .stations()
        .upsert_connector_status(&handler.station_id, request.connector_id, status)
        .await?;

    if status == ConnectorStatus::Faulted {
        handler
            .engine()
            .on_connector_faulted(&handler.station_id, request.connector_id)
            .await?;
    }

    Ok(Value::Object(Default::default()))
}
