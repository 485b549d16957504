//! Balance and top-up endpoints.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::client_id_from;
use crate::interfaces::http::dto::{BalanceView, TopUpBody, TopUpView};
use crate::interfaces::http::error::{ApiError, ApiResult};
use crate::interfaces::http::idempotency::IDEMPOTENCY_HEADER;
use crate::support::CoreError;

use crate::interfaces::http::router::ApiState;

pub async fn get_balance(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> ApiResult<Json<BalanceView>> {
    let client_id = client_id_from(&headers)?;
    let client = state
        .repos
        .clients()
        .find_by_id(&client_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Client", "id", &client_id))?;
    Ok(Json(BalanceView {
        balance: client.balance,
        currency: client.currency,
    }))
}

pub async fn create_topup(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<TopUpBody>,
) -> ApiResult<Json<TopUpView>> {
    let client_id = client_id_from(&headers)?;
    let idempotency_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let topup = state
        .engine
        .create_topup(&client_id, body.amount, idempotency_key)
        .await?;
    Ok(Json(TopUpView::from_topup(topup)))
}

pub async fn topup_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(topup_id): Path<String>,
) -> ApiResult<Json<TopUpView>> {
    let client_id = client_id_from(&headers)?;
    let topup = state
        .repos
        .top_ups()
        .find_by_id(&topup_id)
        .await?
        .ok_or_else(|| CoreError::not_found("TopUp", "id", &topup_id))?;
    if topup.client_id != client_id {
        return Err(ApiError(CoreError::Forbidden(
            "top-up belongs to another client".into(),
        )));
    }
    Ok(Json(TopUpView::from_topup(topup)))
}
