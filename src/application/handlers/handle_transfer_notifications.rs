//! DiagnosticsStatusNotification / FirmwareStatusNotification handlers.
//! Both are acknowledge-and-log.

use serde_json::Value;
use tracing::info;

use super::OcppSessionHandler;
use crate::domain::ocpp::{
    DiagnosticsStatusNotificationRequest, FirmwareStatusNotificationRequest,
};
use crate::support::CoreResult;

pub async fn handle_diagnostics(
    handler: &OcppSessionHandler,
    request: DiagnosticsStatusNotificationRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        status = request.status.as_str(),
        "DiagnosticsStatusNotification"
    );
    Ok(Value::Object(Default::default()))
}

pub async fn handle_firmware(
    handler: &OcppSessionHandler,
    request: FirmwareStatusNotificationRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        status = request.status.as_str(),
        "FirmwareStatusNotification"
    );
    Ok(Value::Object(Default::default()))
}
