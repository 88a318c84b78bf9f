use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::routing::get;
use axum::{BoxError, Json, Router};
use chrono::Utc;
use serde_json::json;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod bookings;
pub mod error;
pub mod hub;
pub mod monitor;
pub mod response;
pub mod seats;
pub mod sessions;
pub mod state;
pub mod worker;
pub mod ws;

pub use state::AppState;

use crate::response::ApiResponse;

/// Deadline applied to every HTTP request at the edge.
const REQUEST_DEADLINE: Duration = Duration::from_secs(10);

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::USER_AGENT,
        ]);

    Router::new()
        .route("/health", get(health))
        .merge(sessions::routes())
        .merge(seats::routes())
        .merge(bookings::routes())
        .merge(ws::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(REQUEST_DEADLINE)),
        )
        .with_state(state)
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, Json<ApiResponse>) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(ApiResponse::error("Request timed out")),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error("Internal server error")),
        )
    }
}

async fn health(State(state): State<AppState>) -> Json<ApiResponse> {
    Json(ApiResponse::ok_with_message(
        "Server is healthy",
        json!({
            "status": "ok",
            "timestamp": Utc::now(),
            "connections": state.hub.total_clients(),
            "evictions": state.hub.evictions(),
            "droppedAuditEvents": state.audit.dropped(),
        }),
    ))
}
