use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use marquee_domain::booking::{Booking, BookingStatus};
use marquee_domain::events::AuditEvent;
use marquee_domain::seat::{SeatStatus, SeatUpdate};
use marquee_domain::session::MovieSession;
use marquee_infra::email::BookingConfirmation;
use marquee_infra::{
    AuditDispatcher, BookingRepository, EmailNotifier, LockError, SeatLockService,
    SessionRepository,
};

use crate::error::AppError;
use crate::hub::Hub;
use crate::response::ApiResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub session_id: String,
    pub seat_ids: Vec<String>,
    pub user_id: String,
    pub user_email: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CancelBookingRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub seats: Vec<String>,
    pub total_amount: f64,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Invalid session ID")]
    InvalidSessionId,
    #[error("Session not found")]
    SessionNotFound,
    #[error("Booking not found")]
    BookingNotFound,
    #[error("Seat {0} is not locked by you")]
    SeatNotOwned(String),
    #[error("Unknown seat {0}")]
    UnknownSeat(String),
    #[error("Booking is not cancellable")]
    NotCancellable,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        match err {
            BookingError::InvalidSessionId | BookingError::UnknownSeat(_) => {
                AppError::Validation(err.to_string())
            }
            BookingError::SessionNotFound | BookingError::BookingNotFound => {
                AppError::NotFound(err.to_string())
            }
            BookingError::SeatNotOwned(_) | BookingError::NotCancellable => {
                AppError::Conflict(err.to_string())
            }
            BookingError::Database(db) => AppError::from(db),
            BookingError::Lock(lock) => AppError::from(lock),
        }
    }
}

/// Orchestrates lock-verify → persist → mark-sold → release → broadcast →
/// audit → notify. Only the verification and persistence steps can fail the
/// booking; everything after is logged and reconciled through TTLs and the
/// next session read.
#[derive(Clone)]
pub struct BookingCoordinator {
    sessions: SessionRepository,
    bookings: BookingRepository,
    locks: SeatLockService,
    hub: Hub,
    audit: AuditDispatcher,
    notifier: Arc<EmailNotifier>,
}

impl BookingCoordinator {
    pub fn new(
        sessions: SessionRepository,
        bookings: BookingRepository,
        locks: SeatLockService,
        hub: Hub,
        audit: AuditDispatcher,
        notifier: Arc<EmailNotifier>,
    ) -> Self {
        Self {
            sessions,
            bookings,
            locks,
            hub,
            audit,
            notifier,
        }
    }

    pub async fn confirm(&self, req: BookingRequest) -> Result<BookingReceipt, BookingError> {
        let session_id =
            Uuid::parse_str(&req.session_id).map_err(|_| BookingError::InvalidSessionId)?;

        self.verify_ownership(&req.session_id, &req.seat_ids, &req.user_id)
            .await?;

        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(BookingError::SessionNotFound)?;
        let total_amount = total_amount(&session, &req.seat_ids)?;

        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            session_id,
            user_id: req.user_id.clone(),
            user_email: req.user_email.clone(),
            seats: req.seat_ids.clone(),
            total_amount,
            status: BookingStatus::Confirmed,
            payment_id: None,
            created_at: now,
            confirmed_at: Some(now),
        };
        self.bookings.insert(&booking).await?;

        // The booking stands from here on; the remaining steps recover
        // through lock TTLs and the next authoritative session read.
        if let Err(err) = self
            .sessions
            .mark_seats(session_id, &req.seat_ids, SeatStatus::Booked)
            .await
        {
            warn!("Failed to mark seats booked for booking {}: {}", booking.id, err);
        }

        if let Err(err) = self
            .locks
            .unlock_seats(&req.session_id, &req.seat_ids, &req.user_id)
            .await
        {
            warn!("Failed to release locks for booking {}: {}", booking.id, err);
        }

        let updates: Vec<SeatUpdate> = req
            .seat_ids
            .iter()
            .map(|seat_id| SeatUpdate::booked(seat_id.as_str()))
            .collect();
        self.hub.broadcast_seat_updates(&req.session_id, updates);

        self.audit.enqueue(AuditEvent::booking_success(
            &req.session_id,
            &req.user_id,
            req.seat_ids.clone(),
            &booking.id.to_string(),
        ));

        self.notify(&req, &booking, &session);

        info!("Booking confirmed: {}", booking.id);
        Ok(BookingReceipt {
            booking_id: booking.id,
            seats: booking.seats,
            total_amount,
        })
    }

    pub async fn cancel(&self, booking_id: Uuid, reason: &str) -> Result<(), BookingError> {
        let booking = self
            .bookings
            .get(booking_id)
            .await?
            .ok_or(BookingError::BookingNotFound)?;
        if booking.status != BookingStatus::Confirmed {
            return Err(BookingError::NotCancellable);
        }

        self.bookings
            .set_status(booking_id, BookingStatus::Cancelled)
            .await?;

        let session_id = booking.session_id.to_string();
        if let Err(err) = self
            .sessions
            .mark_seats(booking.session_id, &booking.seats, SeatStatus::Available)
            .await
        {
            warn!("Failed to free seats for cancelled booking {}: {}", booking_id, err);
        }

        let updates: Vec<SeatUpdate> = booking
            .seats
            .iter()
            .map(|seat_id| SeatUpdate::available(seat_id.as_str()))
            .collect();
        self.hub.broadcast_seat_updates(&session_id, updates);

        self.audit.enqueue(AuditEvent::booking_cancelled(
            &session_id,
            &booking.user_id,
            booking.seats.clone(),
            reason,
        ));

        info!("Booking cancelled: {}", booking_id);
        Ok(())
    }

    /// Step 1 of the booking sequence: every requested seat must currently
    /// be locked by the requesting user.
    async fn verify_ownership(
        &self,
        session_id: &str,
        seat_ids: &[String],
        user_id: &str,
    ) -> Result<(), BookingError> {
        for seat_id in seat_ids {
            match self.locks.is_locked(session_id, seat_id).await {
                Ok(Some(owner)) if owner == user_id => {}
                _ => return Err(BookingError::SeatNotOwned(seat_id.clone())),
            }
        }
        Ok(())
    }

    /// Email is detached; the booking never waits for it.
    fn notify(&self, req: &BookingRequest, booking: &Booking, session: &MovieSession) {
        let notifier = Arc::clone(&self.notifier);
        let to = req.user_email.clone();
        let confirmation = BookingConfirmation {
            user_name: req.user_email.clone(),
            booking_id: booking.id.to_string(),
            movie_title: session.movie_title.clone(),
            theater: session.theater.clone(),
            seats: booking.seats.clone(),
            total_amount: booking.total_amount,
            booking_date: session
                .start_time
                .format("%B %-d, %Y at %-I:%M %p")
                .to_string(),
        };
        tokio::spawn(async move {
            if let Err(err) = notifier.send_booking_confirmation(&to, confirmation).await {
                error!("Failed to send email to {}: {}", to, err);
            }
        });
    }
}

fn total_amount(session: &MovieSession, seat_ids: &[String]) -> Result<f64, BookingError> {
    let mut total = 0.0;
    for seat_id in seat_ids {
        let seat = session
            .seat(seat_id)
            .ok_or_else(|| BookingError::UnknownSeat(seat_id.clone()))?;
        total += seat.price;
    }
    Ok(total)
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/bookings", post(create_booking))
        .route("/api/bookings/:id/cancel", post(cancel_booking))
}

async fn create_booking(
    State(state): State<AppState>,
    Json(req): Json<BookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.seat_ids.is_empty() {
        return Err(AppError::Validation("No seats provided".to_string()));
    }
    if req.user_id.is_empty() || req.user_email.is_empty() {
        return Err(AppError::Validation("userId and userEmail are required".to_string()));
    }

    let receipt = state.coordinator.confirm(req).await.map_err(AppError::from)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(
            "Booking confirmed",
            json!({
                "bookingId": receipt.booking_id,
                "seats": receipt.seats,
                "totalAmount": receipt.total_amount,
            }),
        )),
    ))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<CancelBookingRequest>>,
) -> Result<Json<ApiResponse>, AppError> {
    let booking_id =
        Uuid::parse_str(&id).map_err(|_| AppError::Validation("Invalid booking ID".to_string()))?;
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "user requested".to_string());

    state
        .coordinator
        .cancel(booking_id, &reason)
        .await
        .map_err(AppError::from)?;

    Ok(Json(ApiResponse::message("Booking cancelled")))
}
