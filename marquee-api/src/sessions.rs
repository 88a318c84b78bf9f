use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use uuid::Uuid;

use marquee_domain::seat::{Seat, SeatStatus};
use marquee_domain::session::MovieSession;
use marquee_infra::SeatLockService;

use crate::error::AppError;
use crate::response::ApiResponse;
use crate::state::AppState;

const DEMO_MOVIE_TITLE: &str = "Inception";
const DEMO_THEATER: &str = "Theater 1";
const DEMO_SEAT_PRICE: f64 = 150.0;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/demo", post(create_demo_session))
        .route("/api/sessions/:id", get(get_session))
}

async fn list_sessions(State(state): State<AppState>) -> Result<Json<ApiResponse>, AppError> {
    let sessions = state.sessions.list_upcoming().await?;
    Ok(Json(ApiResponse::ok(to_json(&sessions)?)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse>, AppError> {
    let session_id =
        Uuid::parse_str(&id).map_err(|_| AppError::Validation("Invalid session ID".to_string()))?;
    let mut session = state
        .sessions
        .get(session_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

    overlay_live_locks(&state.locks, &mut session).await;
    Ok(Json(ApiResponse::ok(to_json(&session)?)))
}

async fn create_demo_session(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(mut existing) = state
        .sessions
        .find_demo(DEMO_MOVIE_TITLE, DEMO_THEATER)
        .await?
    {
        overlay_live_locks(&state.locks, &mut existing).await;
        return Ok((
            StatusCode::OK,
            Json(ApiResponse::ok_with_message(
                "Using existing demo session",
                to_json(&existing)?,
            )),
        ));
    }

    let session = build_demo_session();
    state.sessions.insert(&session).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(
            "Demo session created",
            to_json(&session)?,
        )),
    ))
}

/// The session document only knows AVAILABLE and BOOKED; LOCKED is overlaid
/// from live lock probes when a session is rendered.
async fn overlay_live_locks(locks: &SeatLockService, session: &mut MovieSession) {
    let session_id = session.id.to_string();
    for seat in &mut session.seats {
        if seat.status == SeatStatus::Booked {
            continue;
        }
        if let Ok(Some(owner)) = locks.is_locked(&session_id, &seat.id).await {
            seat.status = SeatStatus::Locked;
            seat.locked_by = Some(owner);
        }
    }
}

fn build_demo_session() -> MovieSession {
    let mut seats = Vec::new();
    for row in ["A", "B", "C", "D", "E", "F", "G", "H"] {
        for number in 1..=10 {
            seats.push(Seat {
                id: format!("{row}{number}"),
                row: row.to_string(),
                number,
                status: SeatStatus::Available,
                locked_by: None,
                locked_at: None,
                price: DEMO_SEAT_PRICE,
            });
        }
    }

    let now = Utc::now();
    MovieSession {
        id: Uuid::new_v4(),
        movie_title: DEMO_MOVIE_TITLE.to_string(),
        movie_poster: String::new(),
        theater: DEMO_THEATER.to_string(),
        start_time: now + Duration::hours(2),
        end_time: now + Duration::hours(4),
        total_seats: seats.len() as i32,
        seats,
        created_at: now,
        updated_at: now,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value).map_err(|err| AppError::Internal(err.to_string()))
}
