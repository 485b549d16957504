//! BootNotification handler

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::{BootNotificationRequest, BootNotificationResponse, RegistrationStatus};
use crate::domain::station::{BootInfo, StationStatus};
use crate::support::CoreResult;

/// Returns (accepted, response payload). A rejected boot still answers;
/// the session stays in Connecting and repeated rejects close the socket.
pub async fn handle(
    handler: &OcppSessionHandler,
    request: BootNotificationRequest,
) -> CoreResult<(bool, Value)> {
    info!(
        station_id = handler.station_id.as_str(),
        vendor = request.charge_point_vendor.as_str(),
        model = request.charge_point_model.as_str(),
        "BootNotification"
    );

    let accepted = handler.boot_accepted();
    if accepted {
        let repos = handler.engine().repos();
        repos
            .stations()
            .record_boot(
                &handler.station_id,
                BootInfo {
                    vendor: request.charge_point_vendor,
                    model: request.charge_point_model,
                    serial_number: request.charge_point_serial_number,
                    firmware_version: request.firmware_version,
                },
            )
            .await?;
        repos
            .stations()
            .update_status(&handler.station_id, StationStatus::Available)
            .await?;
    }

    let response = BootNotificationResponse {
        status: if accepted {
            RegistrationStatus::Accepted
        } else {
            RegistrationStatus::Rejected
        },
        current_time: Utc::now(),
        interval: handler.heartbeat_interval() as i32,
    };
    Ok((accepted, to_payload(response)))
}
