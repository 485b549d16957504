//! StartTransaction handler

use serde_json::Value;
use tracing::{info, warn};

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::{
    AuthorizationStatus, IdTagInfo, StartTransactionRequest, StartTransactionResponse,
};
use crate::support::CoreResult;

pub async fn handle(
    handler: &OcppSessionHandler,
    request: StartTransactionRequest,
) -> CoreResult<Value> {
    info!(
        station_id = handler.station_id.as_str(),
        connector_id = request.connector_id,
        id_tag = request.id_tag.as_str(),
        meter_start = request.meter_start,
        "StartTransaction"
    );

    let bound = handler
        .engine()
        .bind_start_transaction(
            &handler.station_id,
            request.connector_id,
            &request.id_tag,
            request.meter_start,
            request.timestamp,
        )
        .await;

    let response = match bound {
        Ok((_, tx_id)) => StartTransactionResponse {
            transaction_id: tx_id,
            id_tag_info: IdTagInfo::of(AuthorizationStatus::Accepted),
        },
        Err(e) => {
            // no matching reservation, or it lapsed: transactionId 0
            warn!(
                station_id = handler.station_id.as_str(),
                id_tag = request.id_tag.as_str(),
                error = %e,
                "StartTransaction rejected"
            );
            StartTransactionResponse {
                transaction_id: 0,
                id_tag_info: IdTagInfo::of(AuthorizationStatus::Invalid),
            }
        }
    };
    Ok(to_payload(response))
}
