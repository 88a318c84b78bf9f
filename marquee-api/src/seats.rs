use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use marquee_domain::events::AuditEvent;
use marquee_domain::seat::SeatUpdate;
use marquee_infra::LockError;

use crate::error::AppError;
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSeatsRequest {
    pub session_id: String,
    pub seat_ids: Vec<String>,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockSeatsRequest {
    pub session_id: String,
    pub seat_ids: Vec<String>,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendLockRequest {
    pub session_id: String,
    pub seat_id: String,
    pub user_id: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/seats/lock", post(lock_seats))
        .route("/api/seats/unlock", post(unlock_seats))
        .route("/api/seats/extend", post(extend_lock))
}

async fn lock_seats(
    State(state): State<AppState>,
    Json(req): Json<LockSeatsRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_identifiers(&req.session_id, &req.user_id)?;
    let session_id = Uuid::parse_str(&req.session_id)
        .map_err(|_| AppError::Validation("Invalid session ID".to_string()))?;

    // A booked seat has no lock record, so the store-level conditional
    // create alone would happily re-lock it.
    let session = state
        .sessions
        .get(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;
    let already_booked = session.booked_seats_among(&req.seat_ids);
    if !already_booked.is_empty() {
        return Ok((
            StatusCode::CONFLICT,
            Json(ApiResponse::error_with_data(
                "Seats are already booked",
                json!({ "failedSeats": already_booked }),
            )),
        ));
    }

    match state
        .locks
        .lock_seats(&req.session_id, &req.seat_ids, &req.user_id)
        .await
    {
        Ok(locked) => {
            let updates: Vec<SeatUpdate> = locked
                .iter()
                .map(|seat_id| SeatUpdate::locked(seat_id.as_str(), req.user_id.as_str()))
                .collect();
            state.hub.broadcast_seat_updates(&req.session_id, updates);
            state.audit.enqueue(AuditEvent::seat_locked(
                &req.session_id,
                &req.user_id,
                locked.clone(),
            ));

            Ok((
                StatusCode::OK,
                Json(ApiResponse::ok_with_message(
                    "Seats locked successfully",
                    json!({
                        "lockedSeats": locked,
                        "expiresIn": state.locks.ttl().as_secs(),
                    }),
                )),
            ))
        }
        Err(LockError::Conflict { failed }) => Ok((
            StatusCode::CONFLICT,
            Json(ApiResponse::error_with_data(
                "Could not lock all seats, some are already locked",
                json!({ "failedSeats": failed }),
            )),
        )),
        Err(err) => Err(AppError::from(err)),
    }
}

async fn unlock_seats(
    State(state): State<AppState>,
    Json(req): Json<UnlockSeatsRequest>,
) -> Result<Json<ApiResponse>, AppError> {
    require_identifiers(&req.session_id, &req.user_id)?;

    let released = state
        .locks
        .unlock_seats(&req.session_id, &req.seat_ids, &req.user_id)
        .await?;

    // Seats we did not release (held by someone else) are not announced.
    if !released.is_empty() {
        let updates: Vec<SeatUpdate> = released
            .iter()
            .map(|seat_id| SeatUpdate::available(seat_id.as_str()))
            .collect();
        state.hub.broadcast_seat_updates(&req.session_id, updates);
        state.audit.enqueue(AuditEvent::seat_unlocked(
            &req.session_id,
            &req.user_id,
            released,
            "manual",
        ));
    }

    Ok(Json(ApiResponse::message("Seats unlocked successfully")))
}

async fn extend_lock(
    State(state): State<AppState>,
    Json(req): Json<ExtendLockRequest>,
) -> Result<Json<ApiResponse>, AppError> {
    require_identifiers(&req.session_id, &req.user_id)?;

    state
        .locks
        .extend_lock(&req.session_id, &req.seat_id, &req.user_id)
        .await?;

    Ok(Json(ApiResponse::ok_with_message(
        "Lock extended",
        json!({ "expiresIn": state.locks.ttl().as_secs() }),
    )))
}

fn require_identifiers(session_id: &str, user_id: &str) -> Result<(), AppError> {
    if session_id.is_empty() || user_id.is_empty() {
        return Err(AppError::Validation(
            "sessionId and userId are required".to_string(),
        ));
    }
    Ok(())
}
