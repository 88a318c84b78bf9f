use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::seat::SeatUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    SeatLocked,
    SeatUnlocked,
    LockExpired,
    BookingSuccess,
    BookingTimeout,
    BookingCancelled,
    SystemError,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SeatLocked => "SEAT_LOCKED",
            AuditEventType::SeatUnlocked => "SEAT_UNLOCKED",
            AuditEventType::LockExpired => "LOCK_EXPIRED",
            AuditEventType::BookingSuccess => "BOOKING_SUCCESS",
            AuditEventType::BookingTimeout => "BOOKING_TIMEOUT",
            AuditEventType::BookingCancelled => "BOOKING_CANCELLED",
            AuditEventType::SystemError => "SYSTEM_ERROR",
        }
    }
}

/// An immutable record of a state-affecting action. Identity is assigned by
/// the consumer when absent; downstream idempotency keys off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    pub event_type: AuditEventType,
    pub session_id: String,
    pub user_id: String,
    #[serde(default)]
    pub seat_ids: Vec<String>,
    #[serde(default = "chrono::Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

impl AuditEvent {
    fn new(
        event_type: AuditEventType,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        seat_ids: Vec<String>,
        description: String,
    ) -> Self {
        Self {
            id: None,
            event_type,
            session_id: session_id.into(),
            user_id: user_id.into(),
            seat_ids,
            timestamp: Utc::now(),
            description,
        }
    }

    pub fn seat_locked(session_id: &str, user_id: &str, seat_ids: Vec<String>) -> Self {
        let description = format!("User {} locked seats: {}", user_id, seat_ids.join(", "));
        Self::new(AuditEventType::SeatLocked, session_id, user_id, seat_ids, description)
    }

    pub fn seat_unlocked(
        session_id: &str,
        user_id: &str,
        seat_ids: Vec<String>,
        reason: &str,
    ) -> Self {
        let description = format!("Seats unlocked ({}): {}", reason, seat_ids.join(", "));
        Self::new(AuditEventType::SeatUnlocked, session_id, user_id, seat_ids, description)
    }

    pub fn lock_expired(session_id: &str, seat_id: &str) -> Self {
        Self::new(
            AuditEventType::LockExpired,
            session_id,
            "system",
            vec![seat_id.to_string()],
            "Seat lock expired (5 min timeout)".to_string(),
        )
    }

    pub fn booking_success(
        session_id: &str,
        user_id: &str,
        seat_ids: Vec<String>,
        booking_id: &str,
    ) -> Self {
        let description = format!(
            "Booking {} confirmed for user {}, seats: {}",
            booking_id,
            user_id,
            seat_ids.join(", ")
        );
        Self::new(AuditEventType::BookingSuccess, session_id, user_id, seat_ids, description)
    }

    pub fn booking_timeout(session_id: &str, user_id: &str, seat_ids: Vec<String>) -> Self {
        let description = format!(
            "Booking timed out for user {}, seats released: {}",
            user_id,
            seat_ids.join(", ")
        );
        Self::new(AuditEventType::BookingTimeout, session_id, user_id, seat_ids, description)
    }

    pub fn booking_cancelled(
        session_id: &str,
        user_id: &str,
        seat_ids: Vec<String>,
        reason: &str,
    ) -> Self {
        let description = format!(
            "Booking cancelled for user {} ({}), seats: {}",
            user_id,
            reason,
            seat_ids.join(", ")
        );
        Self::new(AuditEventType::BookingCancelled, session_id, user_id, seat_ids, description)
    }

    pub fn system_error(error_type: &str, description: &str, details: serde_json::Value) -> Self {
        Self::new(
            AuditEventType::SystemError,
            "",
            "system",
            Vec::new(),
            format!("{}: {} | {}", error_type, description, details),
        )
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize audit event: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to publish audit event: {0}")]
    Transport(String),
}

/// Sink for audit events. The Kafka producer is the production
/// implementation; tests substitute a channel-backed one.
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Server → client realtime frame, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum WsServerMessage {
    #[serde(rename = "SEAT_UPDATE")]
    SeatUpdate {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: SeatUpdate,
    },
    #[serde(rename = "SEATS_UPDATE")]
    SeatsUpdate {
        #[serde(rename = "sessionId")]
        session_id: String,
        data: Vec<SeatUpdate>,
    },
}

/// Client → server realtime frame. Unknown types deserialize to `Unknown`
/// and are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum WsClientMessage {
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "SUBSCRIBE")]
    Subscribe {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seat::SeatStatus;

    #[test]
    fn audit_event_round_trips_as_json() {
        let event = AuditEvent::seat_locked("S1", "u1", vec!["A1".to_string(), "A2".to_string()]);
        let json = serde_json::to_string(&event).unwrap();
        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, AuditEventType::SeatLocked);
        assert_eq!(parsed.session_id, "S1");
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.seat_ids, vec!["A1", "A2"]);
        assert_eq!(parsed.timestamp, event.timestamp);
        assert_eq!(parsed.description, event.description);
    }

    #[test]
    fn audit_event_uses_wire_field_names() {
        let event = AuditEvent::lock_expired("S1", "B5");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["eventType"], "LOCK_EXPIRED");
        assert_eq!(json["sessionId"], "S1");
        assert_eq!(json["userId"], "system");
        assert_eq!(json["seatIds"], serde_json::json!(["B5"]));
        assert!(json.get("id").is_none());
    }

    #[test]
    fn missing_timestamp_is_stamped_on_parse() {
        let raw = r#"{"eventType":"SEAT_UNLOCKED","sessionId":"S1","userId":"u1","seatIds":["A1"],"description":"Seats unlocked (manual): A1"}"#;
        let parsed: AuditEvent = serde_json::from_str(raw).unwrap();
        assert!(parsed.id.is_none());
        assert!(parsed.timestamp <= Utc::now());
    }

    #[test]
    fn ws_server_message_matches_protocol_shape() {
        let msg = WsServerMessage::SeatUpdate {
            session_id: "S1".to_string(),
            data: crate::seat::SeatUpdate::available("B5"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "SEAT_UPDATE",
                "sessionId": "S1",
                "data": {"seatId": "B5", "status": "AVAILABLE"}
            })
        );
    }

    #[test]
    fn ws_client_message_parses_known_and_unknown_types() {
        let ping: WsClientMessage = serde_json::from_str(r#"{"type":"PING"}"#).unwrap();
        assert!(matches!(ping, WsClientMessage::Ping));

        let sub: WsClientMessage =
            serde_json::from_str(r#"{"type":"SUBSCRIBE","sessionId":"S2"}"#).unwrap();
        match sub {
            WsClientMessage::Subscribe { session_id } => assert_eq!(session_id, "S2"),
            other => panic!("unexpected message: {other:?}"),
        }

        let unknown: WsClientMessage = serde_json::from_str(r#"{"type":"NOISE"}"#).unwrap();
        assert!(matches!(unknown, WsClientMessage::Unknown));
    }

    #[test]
    fn seat_update_status_in_frames_uses_upper_snake() {
        let msg = WsServerMessage::SeatsUpdate {
            session_id: "S1".to_string(),
            data: vec![crate::seat::SeatUpdate::booked("A1")],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["data"][0]["status"], SeatStatus::Booked.as_str());
    }
}
