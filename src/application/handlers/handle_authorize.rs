//! Authorize handler

use serde_json::Value;
use tracing::info;

use super::{to_payload, OcppSessionHandler};
use crate::domain::ocpp::{AuthorizationStatus, AuthorizeRequest, AuthorizeResponse, IdTagInfo};
use crate::support::CoreResult;

pub async fn handle(
    handler: &OcppSessionHandler,
    request: AuthorizeRequest,
) -> CoreResult<Value> {
    let chargeable = handler.engine().authorize_id_tag(&request.id_tag).await?;

    info!(
        station_id = handler.station_id.as_str(),
        id_tag = request.id_tag.as_str(),
        chargeable,
        "Authorize"
    );

    let status = if chargeable {
        AuthorizationStatus::Accepted
    } else {
        AuthorizationStatus::Blocked
    };
    Ok(to_payload(AuthorizeResponse {
        id_tag_info: IdTagInfo::of(status),
    }))
}
