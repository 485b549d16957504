//! REST handlers.

pub mod balance;
pub mod charging;
pub mod health;
pub mod stations;
pub mod webhook;

use axum::http::HeaderMap;

use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::idempotency::CLIENT_HEADER;
use crate::support::CoreError;

/// Caller identity as established by the upstream auth gateway.
pub(crate) fn client_id_from(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError(CoreError::Unauthenticated(format!(
                "missing {CLIENT_HEADER} header"
            )))
        })
}
