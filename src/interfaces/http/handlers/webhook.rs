//! Payment webhook entry.
//!
//! The provider's raw body is verified against the shared secret before
//! parsing. A 2xx with the provider's expected acknowledgment string
//! confirms receipt; anything else tells the provider to retry.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use crate::interfaces::http::error::ApiError;
use crate::interfaces::http::router::ApiState;
use crate::support::CoreError;

pub async fn handle(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = headers
        .get(state.provider.signature_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !state.provider.verify_webhook(&body, signature) {
        warn!(
            provider = state.provider.name(),
            "webhook signature rejected"
        );
        return Err(ApiError(CoreError::Unauthenticated(
            "webhook signature invalid".into(),
        )));
    }

    let event = state.provider.parse_webhook(&body)?;
    let outcome = state.engine.apply_webhook(event).await?;

    info!(provider = state.provider.name(), ?outcome, "webhook processed");
    Ok(state.provider.ack_body().into_response())
}
