//! StopTransaction handler

use serde_json::Value;
use tracing::info;

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::{
    AuthorizationStatus, IdTagInfo, StopTransactionRequest, StopTransactionResponse,
};
use crate::support::CoreResult;

pub async fn handle(
    handler: &OcppSessionHandler,
    request: StopTransactionRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        transaction_id = request.transaction_id,
        meter_stop = request.meter_stop,
        reason = request.reason.as_deref().unwrap_or("-"),
        "StopTransaction"
    );

    let settled = handler
        .engine()
        .settle_stop_transaction(
            &handler.station_id,
            request.transaction_id,
            request.meter_stop,
            request.timestamp,
        )
        .await?;

    info!(
        station_id = handler.station_id.as_str(),
        session_id = settled.id.as_str(),
        energy_wh = settled.energy_wh.unwrap_or(0),
        amount_charged = settled.amount_charged.unwrap_or(0),
        refund = settled.refund_amount.unwrap_or(0),
        "transaction settled"
    );

    Ok(to_payload(StopTransactionResponse {
        id_tag_info: Some(IdTagInfo::of(AuthorizationStatus::Accepted)),
    }))
}
