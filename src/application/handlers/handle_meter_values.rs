//! MeterValues handler

use serde_json::Value;
use tracing::debug;

use super::OcppSessionHandler;
use crate::domain::ocpp::MeterValuesRequest;
use crate::support::CoreResult;

pub async fn handle(
    handler: &OcppSessionHandler,
    request: MeterValuesRequest,
) -> CoreResult<Value> {
    debug!(
        station_id = handler.station_id.as_str(),
        connector_id = request.connector_id,
        transaction_id = ?request.transaction_id,
        samples = request.meter_value.len(),
        "MeterValues"
    );

    handler
        .engine()
        .record_meter_values(
            &handler.station_id,
            request.connector_id,
            request.transaction_id,
            &request.meter_value,
        )
        .await?;

    Ok(Value::Object(Default::default()))
}
