use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use marquee_domain::events::AuditEvent;
use marquee_domain::seat::SeatUpdate;
use marquee_infra::seat_lock::parse_lock_key;
use marquee_infra::{AuditDispatcher, LockStore};

use crate::hub::Hub;

/// Folds TTL-driven lock expirations back into the realtime and audit
/// layers. The seat was never marked BOOKED, so no session mutation is
/// needed; viewers just learn the seat is claimable again.
pub struct LockExpiryMonitor {
    store: Arc<dyn LockStore>,
    hub: Hub,
    audit: AuditDispatcher,
}

impl LockExpiryMonitor {
    pub fn new(store: Arc<dyn LockStore>, hub: Hub, audit: AuditDispatcher) -> Self {
        Self { store, hub, audit }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut expired = match self.store.subscribe_expired().await {
            Ok(expired) => expired,
            Err(err) => {
                warn!("Lock store not available, lock expiry monitor disabled: {}", err);
                return;
            }
        };

        info!("Lock expiry monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Lock expiry monitor stopped");
                    return;
                }
                maybe_key = expired.recv() => {
                    let Some(key) = maybe_key else {
                        warn!("Expiry subscription closed, lock expiry monitor stopping");
                        return;
                    };
                    self.handle_expired_key(&key);
                }
            }
        }
    }

    fn handle_expired_key(&self, key: &str) {
        // The expiry channel carries every expired key in the database.
        let Some((session_id, seat_id)) = parse_lock_key(key) else {
            return;
        };

        info!("Lock expired: session={}, seat={}", session_id, seat_id);

        self.hub
            .broadcast_seat_update(session_id, SeatUpdate::available(seat_id));
        self.audit
            .enqueue(AuditEvent::lock_expired(session_id, seat_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use marquee_domain::events::{AuditError, AuditEventType, AuditPublisher};
    use marquee_infra::{MemoryLockStore, SeatLockService};

    use crate::hub::Subscriber;

    struct CollectingPublisher {
        tx: mpsc::UnboundedSender<AuditEvent>,
    }

    #[async_trait]
    impl AuditPublisher for CollectingPublisher {
        async fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
            self.tx
                .send(event)
                .map_err(|e| AuditError::Transport(e.to_string()))
        }
    }

    #[tokio::test]
    async fn expiry_becomes_broadcast_and_audit_event() {
        let store = Arc::new(MemoryLockStore::new());
        let locks = SeatLockService::with_ttl(store.clone(), Duration::from_millis(80));
        let hub = Hub::spawn();
        let (audit_tx, mut audit_rx) = mpsc::unbounded_channel();
        let audit = AuditDispatcher::spawn(Arc::new(CollectingPublisher { tx: audit_tx }));

        let shutdown = CancellationToken::new();
        tokio::spawn(
            LockExpiryMonitor::new(store.clone(), hub.clone(), audit.clone())
                .run(shutdown.clone()),
        );

        let (subscriber, mut frames) = Subscriber::new("viewer");
        hub.register("S1", subscriber);

        // Lock B5 and let the TTL elapse without a release.
        assert!(locks.lock_seat("S1", "B5", "u1").await.unwrap());

        let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
            .await
            .expect("no expiry broadcast")
            .unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "SEAT_UPDATE");
        assert_eq!(json["sessionId"], "S1");
        assert_eq!(json["data"]["seatId"], "B5");
        assert_eq!(json["data"]["status"], "AVAILABLE");

        let event = tokio::time::timeout(Duration::from_secs(2), audit_rx.recv())
            .await
            .expect("no audit event")
            .unwrap();
        assert_eq!(event.event_type, AuditEventType::LockExpired);
        assert_eq!(event.session_id, "S1");
        assert_eq!(event.seat_ids, vec!["B5"]);
        assert_eq!(event.user_id, "system");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn foreign_expired_keys_are_ignored() {
        let store = Arc::new(MemoryLockStore::new());
        let hub = Hub::spawn();
        let (audit_tx, mut audit_rx) = mpsc::unbounded_channel();
        let audit = AuditDispatcher::spawn(Arc::new(CollectingPublisher { tx: audit_tx }));

        let shutdown = CancellationToken::new();
        tokio::spawn(
            LockExpiryMonitor::new(store.clone(), hub.clone(), audit).run(shutdown.clone()),
        );

        store
            .create_if_absent("ratelimit:1.2.3.4", "1", Duration::from_millis(50))
            .await
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_millis(400), audit_rx.recv()).await;
        assert!(outcome.is_err(), "foreign keys must not produce audit events");

        shutdown.cancel();
    }
}
