use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    Available,
    Locked,
    Booked,
}

impl SeatStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeatStatus::Available => "AVAILABLE",
            SeatStatus::Locked => "LOCKED",
            SeatStatus::Booked => "BOOKED",
        }
    }
}

impl std::str::FromStr for SeatStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(SeatStatus::Available),
            "LOCKED" => Ok(SeatStatus::Locked),
            "BOOKED" => Ok(SeatStatus::Booked),
            other => Err(format!("unknown seat status: {other}")),
        }
    }
}

impl std::fmt::Display for SeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One assigned position within a session. `status` is the persisted ground
/// truth; LOCKED is overlaid from the lock store when a session is rendered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seat {
    pub id: String,
    pub row: String,
    pub number: i32,
    pub status: SeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    pub price: f64,
}

/// Per-seat status change pushed to live viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatUpdate {
    pub seat_id: String,
    pub status: SeatStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
}

impl SeatUpdate {
    pub fn available(seat_id: impl Into<String>) -> Self {
        Self {
            seat_id: seat_id.into(),
            status: SeatStatus::Available,
            locked_by: None,
        }
    }

    pub fn locked(seat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            seat_id: seat_id.into(),
            status: SeatStatus::Locked,
            locked_by: Some(user_id.into()),
        }
    }

    pub fn booked(seat_id: impl Into<String>) -> Self {
        Self {
            seat_id: seat_id.into(),
            status: SeatStatus::Booked,
            locked_by: None,
        }
    }
}
