//! REST error translation: `CoreError` kinds to HTTP statuses and the
//! `{code, message, details?}` error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::support::CoreError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError(pub CoreError);

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self(e)
    }
}

fn status_of(e: &CoreError) -> StatusCode {
    match e {
        CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CoreError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        CoreError::Conflict(_)
        | CoreError::ClientBusy
        | CoreError::ConnectorBusy { .. }
        | CoreError::InsufficientFunds { .. }
        | CoreError::StationUnavailable(_) => StatusCode::CONFLICT,
        CoreError::ProviderFailure(_) => StatusCode::BAD_GATEWAY,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Database(_) | CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn details_of(e: &CoreError) -> Option<Value> {
    match e {
        CoreError::InsufficientFunds { balance, required } => Some(serde_json::json!({
            "balance": balance,
            "required": required,
        })),
        CoreError::ConnectorBusy {
            station_id,
            connector_id,
        } => Some(serde_json::json!({
            "station_id": station_id,
            "connector_id": connector_id,
        })),
        _ => None,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.0);
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // internals stay in the logs
            "internal error".to_string()
        } else {
            self.0.to_string()
        };
        let body = ErrorBody {
            code: self.0.code(),
            message,
            details: details_of(&self.0),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_follow_error_kinds() {
        assert_eq!(status_of(&CoreError::ClientBusy), StatusCode::CONFLICT);
        assert_eq!(
            status_of(&CoreError::InsufficientFunds {
                balance: 50,
                required: 100
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(&CoreError::not_found("Session", "id", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(&CoreError::InvalidArgument("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&CoreError::ProviderFailure("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(&CoreError::Timeout("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn insufficient_funds_carries_details() {
        let details = details_of(&CoreError::InsufficientFunds {
            balance: 50,
            required: 100,
        })
        .unwrap();
        assert_eq!(details["balance"], 50);
        assert_eq!(details["required"], 100);
    }
}
