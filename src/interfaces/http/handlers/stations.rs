//! Station status read endpoint.

use axum::extract::{Path, State};
use axum::Json;

use crate::interfaces::http::dto::StationView;
use crate::interfaces::http::error::ApiResult;
use crate::interfaces::http::router::ApiState;
use crate::support::CoreError;

pub async fn get_station(
    State(state): State<ApiState>,
    Path(station_id): Path<String>,
) -> ApiResult<Json<StationView>> {
    let station = state
        .repos
        .stations()
        .find_by_id(&station_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Station", "id", &station_id))?;
    let connectors = state.repos.stations().list_connectors(&station_id).await?;
    let online = state.registry.is_registered(&station_id).await?;
    Ok(Json(StationView::from_station(station, connectors, online)))
}
