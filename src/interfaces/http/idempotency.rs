//! Idempotency-Key replay for write endpoints.
//!
//! The first completed response under a key is cached in the bus for
//! 24 h and replayed verbatim for the same (client, route, key). 5xx
//! responses are not cached so a retry can succeed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::infrastructure::bus::Bus;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
pub const CLIENT_HEADER: &str = "X-Client-Id";

const CACHE_TTL: Duration = Duration::from_secs(24 * 3600);
const MAX_CACHED_BODY: usize = 64 * 1024;

#[derive(Clone)]
pub struct IdempotencyState {
    pub bus: Arc<dyn Bus>,
}

#[derive(Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    content_type: Option<String>,
    body: String,
}

pub async fn idempotency_layer(
    State(state): State<IdempotencyState>,
    request: Request,
    next: Next,
) -> Response {
    let key = request
        .headers()
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let client = request
        .headers()
        .get(CLIENT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (Some(key), Some(client)) = (key, client) else {
        return next.run(request).await;
    };

    let cache_key = format!(
        "idem:{client}:{}:{}:{key}",
        request.method(),
        request.uri().path()
    );

    match state.bus.get(&cache_key).await {
        Ok(Some(cached)) => {
            if let Ok(cached) = serde_json::from_str::<CachedResponse>(&cached) {
                debug!(cache_key = cache_key.as_str(), "replaying idempotent response");
                return rebuild(cached);
            }
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "idempotency cache read failed"),
    }

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();

    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer response body");
            return Response::from_parts(parts, Body::empty());
        }
    };

    if parts.status.as_u16() < 500 && bytes.len() <= MAX_CACHED_BODY {
        let cached = CachedResponse {
            status: parts.status.as_u16(),
            content_type: parts
                .headers
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body: String::from_utf8_lossy(&bytes).to_string(),
        };
        if let Ok(serialized) = serde_json::to_string(&cached) {
            if let Err(e) = state.bus.put(&cache_key, serialized, Some(CACHE_TTL)).await {
                warn!(error = %e, "idempotency cache write failed");
            }
        }
    }

    Response::from_parts(parts, Body::from(bytes))
}

fn rebuild(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() =
        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Some(content_type) = cached.content_type {
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            response
                .headers_mut()
                .insert(axum::http::header::CONTENT_TYPE, value);
        }
    }
    response
}
