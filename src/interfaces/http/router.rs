//! REST router.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Json, Router};
use chrono::{DateTime, Utc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::application::lifecycle::LifecycleEngine;
use crate::application::registry::StationRegistry;
use crate::domain::RepositoryProvider;
use crate::infrastructure::bus::Bus;
use crate::infrastructure::provider::PaymentProvider;
use crate::interfaces::http::handlers::{balance, charging, health, stations, webhook};
use crate::interfaces::http::idempotency::{idempotency_layer, IdempotencyState};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<LifecycleEngine>,
    pub repos: Arc<dyn RepositoryProvider>,
    pub registry: Arc<StationRegistry>,
    pub provider: Arc<dyn PaymentProvider>,
    pub started_at: DateTime<Utc>,
}

/// Build the REST surface. Write endpoints honor `Idempotency-Key`;
/// the webhook does not (the credit path is idempotent on its own).
pub fn create_api_router(state: ApiState, bus: Arc<dyn Bus>, rest_timeout_secs: u64) -> Router {
    let idempotency = IdempotencyState { bus };

    let write_routes = Router::new()
        .route("/charging/start", post(charging::start))
        .route("/charging/stop", post(charging::stop))
        .route("/balance/topup", post(balance::create_topup))
        .layer(middleware::from_fn_with_state(
            idempotency,
            idempotency_layer,
        ));

    let read_routes = Router::new()
        .route("/charging/{session_id}", get(charging::status))
        .route("/balance", get(balance::get_balance))
        .route("/balance/topup/{topup_id}", get(balance::topup_status))
        .route("/stations/{station_id}", get(stations::get_station));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/payment/webhook", post(webhook::handle))
        .merge(write_routes)
        .merge(read_routes)
        .with_state(state)
        .layer(TimeoutLayer::new(Duration::from_secs(rest_timeout_secs)))
        .layer(middleware::from_fn(wall_clock_exceeded_as_504))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// The timeout layer answers 408; the contract is 504 for an exceeded
/// wall clock.
async fn wall_clock_exceeded_as_504(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({
                "code": "timeout",
                "message": "request exceeded the wall-clock budget",
            })),
        )
            .into_response();
    }
    response
}
