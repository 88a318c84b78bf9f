use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::seat::{Seat, SeatStatus};

/// One scheduled showing. Seat membership is fixed at creation; the set of
/// BOOKED seats on the document is the canonical ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovieSession {
    pub id: Uuid,
    pub movie_title: String,
    pub movie_poster: String,
    pub theater: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub seats: Vec<Seat>,
    pub total_seats: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MovieSession {
    pub fn seat(&self, label: &str) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id == label)
    }

    /// Labels among `labels` whose stored status is already BOOKED.
    pub fn booked_seats_among(&self, labels: &[String]) -> Vec<String> {
        labels
            .iter()
            .filter(|label| {
                self.seat(label)
                    .map(|s| s.status == SeatStatus::Booked)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}
