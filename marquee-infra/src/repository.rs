use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use marquee_domain::booking::{Booking, BookingStatus};
use marquee_domain::events::AuditEvent;
use marquee_domain::seat::{Seat, SeatStatus};
use marquee_domain::session::MovieSession;

fn decode_err(msg: String) -> sqlx::Error {
    sqlx::Error::Decode(msg.into())
}

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    movie_title: String,
    movie_poster: String,
    theater: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    total_seats: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SeatRow {
    label: String,
    seat_row: String,
    number: i32,
    status: String,
    price: f64,
}

impl SeatRow {
    fn into_seat(self) -> Result<Seat, sqlx::Error> {
        let status: SeatStatus = self.status.parse().map_err(decode_err)?;
        Ok(Seat {
            id: self.label,
            row: self.seat_row,
            number: self.number,
            status,
            locked_by: None,
            locked_at: None,
            price: self.price,
        })
    }
}

#[derive(Clone)]
pub struct SessionRepository {
    pool: Pool<Postgres>,
}

impl SessionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn list_upcoming(&self) -> Result<Vec<MovieSession>, sqlx::Error> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, movie_title, movie_poster, theater, start_time, end_time,
                   total_seats, created_at, updated_at
            FROM sessions
            WHERE start_time >= $1
            ORDER BY start_time
            "#,
        )
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in rows {
            sessions.push(self.assemble(row).await?);
        }
        Ok(sessions)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<MovieSession>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, movie_title, movie_poster, theater, start_time, end_time,
                   total_seats, created_at, updated_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn find_demo(
        &self,
        movie_title: &str,
        theater: &str,
    ) -> Result<Option<MovieSession>, sqlx::Error> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, movie_title, movie_poster, theater, start_time, end_time,
                   total_seats, created_at, updated_at
            FROM sessions
            WHERE movie_title = $1 AND theater = $2
            LIMIT 1
            "#,
        )
        .bind(movie_title)
        .bind(theater)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.assemble(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn insert(&self, session: &MovieSession) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, movie_title, movie_poster, theater, start_time,
                                  end_time, total_seats, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id)
        .bind(&session.movie_title)
        .bind(&session.movie_poster)
        .bind(&session.theater)
        .bind(session.start_time)
        .bind(session.end_time)
        .bind(session.total_seats)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut *tx)
        .await?;

        for seat in &session.seats {
            sqlx::query(
                r#"
                INSERT INTO seats (session_id, label, seat_row, number, status, price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(session.id)
            .bind(&seat.id)
            .bind(&seat.row)
            .bind(seat.number)
            .bind(seat.status.as_str())
            .bind(seat.price)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }

    /// Row-level per-seat status update; no transaction is needed because
    /// the lock layer has already serialized contention on these seats.
    pub async fn mark_seats(
        &self,
        session_id: Uuid,
        labels: &[String],
        status: SeatStatus,
    ) -> Result<(), sqlx::Error> {
        for label in labels {
            sqlx::query(
                r#"
                UPDATE seats SET status = $1
                WHERE session_id = $2 AND label = $3
                "#,
            )
            .bind(status.as_str())
            .bind(session_id)
            .bind(label)
            .execute(&self.pool)
            .await?;
        }

        sqlx::query("UPDATE sessions SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn assemble(&self, row: SessionRow) -> Result<MovieSession, sqlx::Error> {
        let seat_rows: Vec<SeatRow> = sqlx::query_as(
            r#"
            SELECT label, seat_row, number, status, price
            FROM seats
            WHERE session_id = $1
            ORDER BY seat_row, number
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let seats = seat_rows
            .into_iter()
            .map(SeatRow::into_seat)
            .collect::<Result<Vec<Seat>, sqlx::Error>>()?;

        Ok(MovieSession {
            id: row.id,
            movie_title: row.movie_title,
            movie_poster: row.movie_poster,
            theater: row.theater,
            start_time: row.start_time,
            end_time: row.end_time,
            seats,
            total_seats: row.total_seats,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    session_id: Uuid,
    user_id: String,
    user_email: String,
    seats: Vec<String>,
    total_amount: f64,
    status: String,
    payment_id: Option<String>,
    created_at: DateTime<Utc>,
    confirmed_at: Option<DateTime<Utc>>,
}

impl BookingRow {
    fn into_booking(self) -> Result<Booking, sqlx::Error> {
        let status: BookingStatus = self.status.parse().map_err(decode_err)?;
        Ok(Booking {
            id: self.id,
            session_id: self.session_id,
            user_id: self.user_id,
            user_email: self.user_email,
            seats: self.seats,
            total_amount: self.total_amount,
            status,
            payment_id: self.payment_id,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
        })
    }
}

#[derive(Clone)]
pub struct BookingRepository {
    pool: Pool<Postgres>,
}

impl BookingRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, booking: &Booking) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO bookings (id, session_id, user_id, user_email, seats,
                                  total_amount, status, payment_id, created_at, confirmed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(booking.id)
        .bind(booking.session_id)
        .bind(&booking.user_id)
        .bind(&booking.user_email)
        .bind(&booking.seats)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(&booking.payment_id)
        .bind(booking.created_at)
        .bind(booking.confirmed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Booking>, sqlx::Error> {
        let row: Option<BookingRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, user_id, user_email, seats, total_amount,
                   status, payment_id, created_at, confirmed_at
            FROM bookings
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BookingRow::into_booking).transpose()
    }

    pub async fn set_status(&self, id: Uuid, status: BookingStatus) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE bookings SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct AuditLogRepository {
    pool: Pool<Postgres>,
}

impl AuditLogRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, event: &AuditEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, event_type, session_id, user_id, seat_ids,
                                    timestamp, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.unwrap_or_else(Uuid::new_v4))
        .bind(event.event_type.as_str())
        .bind(&event.session_id)
        .bind(&event.user_id)
        .bind(&event.seat_ids)
        .bind(event.timestamp)
        .bind(&event.description)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
