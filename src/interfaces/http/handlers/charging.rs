//! Charging endpoints: thin translation over the lifecycle engine.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use tracing::info;

use super::client_id_from;
use crate::application::lifecycle::{StartChargeRequest, StopActor};
use crate::interfaces::http::dto::{
    SessionView, StartChargeBody, StartChargeResponse, StopChargeBody,
};
use crate::interfaces::http::error::ApiResult;
use crate::interfaces::http::router::ApiState;

pub async fn start(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<StartChargeBody>,
) -> ApiResult<Json<StartChargeResponse>> {
    let client_id = client_id_from(&headers)?;
    let (limit_kind, limit_value) = body.canonical_limit()?;

    info!(
        client_id = client_id.as_str(),
        station_id = body.station_id.as_str(),
        connector_id = body.connector_id,
        limit_kind = limit_kind.as_str(),
        limit_value,
        "start charge requested"
    );

    let session = state
        .engine
        .start_charge(StartChargeRequest {
            client_id,
            station_id: body.station_id,
            connector_id: body.connector_id,
            limit_kind,
            limit_value,
        })
        .await?;

    Ok(Json(StartChargeResponse {
        session_id: session.id,
    }))
}

pub async fn stop(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<StopChargeBody>,
) -> ApiResult<Json<SessionView>> {
    let client_id = client_id_from(&headers)?;

    let session = state
        .engine
        .stop_charge(&body.session_id, StopActor::Client(&client_id))
        .await?;

    let online = state.registry.is_registered(&session.station_id).await?;
    Ok(Json(SessionView::from_session(session, online)))
}

pub async fn status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(session_id): Path<String>,
) -> ApiResult<Json<SessionView>> {
    let client_id = client_id_from(&headers)?;
    let snapshot = state
        .engine
        .session_snapshot(&session_id, Some(&client_id))
        .await?;
    Ok(Json(SessionView::from_snapshot(snapshot)))
}
