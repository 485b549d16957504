//! DataTransfer handler

use serde_json::Value;
use tracing::info;

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::{DataTransferRequest, DataTransferResponse, DataTransferStatus};
use crate::support::CoreResult;

/// Vendor extensions we answer; everything else is UnknownVendorId.
const KNOWN_VENDOR: &str = "com.voltline";

pub async fn handle(
    handler: &OcppSessionHandler,
    request: DataTransferRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        vendor_id = request.vendor_id.as_str(),
        message_id = request.message_id.as_deref().unwrap_or("-"),
        "DataTransfer"
    );

    let status = if request.vendor_id == KNOWN_VENDOR {
        DataTransferStatus::Accepted
    } else {
        DataTransferStatus::UnknownVendorId
    };

    Ok(to_payload(DataTransferResponse { status, data: None }))
}
