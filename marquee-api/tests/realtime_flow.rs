use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use marquee_api::hub::{Hub, Subscriber};
use marquee_api::monitor::LockExpiryMonitor;
use marquee_domain::events::{AuditError, AuditEvent, AuditEventType, AuditPublisher};
use marquee_infra::{AuditDispatcher, MemoryLockStore, SeatLockService};

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

struct Harness {
    locks: SeatLockService,
    hub: Hub,
    audit_rx: mpsc::UnboundedReceiver<AuditEvent>,
    shutdown: CancellationToken,
}

fn start(ttl: Duration) -> Harness {
    let store = Arc::new(MemoryLockStore::new());
    let locks = SeatLockService::with_ttl(store.clone(), ttl);
    let hub = Hub::spawn();
    let (audit_tx, audit_rx) = mpsc::unbounded_channel();
    let audit = AuditDispatcher::spawn(Arc::new(CollectingPublisher { tx: audit_tx }));

    let shutdown = CancellationToken::new();
    tokio::spawn(LockExpiryMonitor::new(store, hub.clone(), audit).run(shutdown.clone()));

    Harness {
        locks,
        hub,
        audit_rx,
        shutdown,
    }
}

fn seats(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn contended_acquire_leaves_no_residue_and_only_the_winner_expires() {
    let mut harness = start(Duration::from_millis(120));

    let (subscriber, mut frames) = Subscriber::new("viewer");
    harness.hub.register("S1", subscriber);

    // u1 holds A1; u2's all-or-nothing grab of A1+A2 must fail and roll back.
    assert!(harness.locks.lock_seat("S1", "A1", "u1").await.unwrap());
    assert!(harness
        .locks
        .lock_seats("S1", &seats(&["A1", "A2"]), "u2")
        .await
        .is_err());
    assert_eq!(harness.locks.is_locked("S1", "A2").await.unwrap(), None);
    assert_eq!(
        harness.locks.is_locked("S1", "A1").await.unwrap(),
        Some("u1".to_string())
    );

    // Only u1's A1 lock ever reaches the TTL; the rolled-back A2 claim was
    // deleted, which emits no expiry.
    let frame = tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .expect("expiry broadcast missing")
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(json["type"], "SEAT_UPDATE");
    assert_eq!(json["data"]["seatId"], "A1");
    assert_eq!(json["data"]["status"], "AVAILABLE");

    let event = tokio::time::timeout(Duration::from_secs(2), harness.audit_rx.recv())
        .await
        .expect("audit event missing")
        .unwrap();
    assert_eq!(event.event_type, AuditEventType::LockExpired);
    assert_eq!(event.seat_ids, vec!["A1"]);

    let extra = tokio::time::timeout(Duration::from_millis(300), harness.audit_rx.recv()).await;
    assert!(extra.is_err(), "no further expiry events expected");

    harness.shutdown.cancel();
}

#[tokio::test]
async fn owner_release_consumes_the_lock_without_an_expiry_event() {
    let mut harness = start(Duration::from_millis(150));

    assert!(harness.locks.lock_seat("S1", "B1", "u1").await.unwrap());
    harness.locks.unlock_seat("S1", "B1", "u1").await.unwrap();

    // Well past the TTL: a released lock must not resurface as expired.
    let outcome = tokio::time::timeout(Duration::from_millis(500), harness.audit_rx.recv()).await;
    assert!(outcome.is_err(), "released lock produced an expiry event");

    harness.shutdown.cancel();
}

#[tokio::test]
async fn ownership_violation_leaves_lock_and_wire_untouched() {
    let mut harness = start(Duration::from_secs(60));

    let (subscriber, mut frames) = Subscriber::new("viewer");
    harness.hub.register("S1", subscriber);

    assert!(harness.locks.lock_seat("S1", "A1", "u1").await.unwrap());
    assert!(harness.locks.unlock_seat("S1", "A1", "u2").await.is_err());

    assert_eq!(
        harness.locks.is_locked("S1", "A1").await.unwrap(),
        Some("u1".to_string())
    );
    let silent = tokio::time::timeout(Duration::from_millis(200), frames.recv()).await;
    assert!(silent.is_err(), "denied release must not broadcast");
    let no_audit = tokio::time::timeout(Duration::from_millis(100), harness.audit_rx.recv()).await;
    assert!(no_audit.is_err());

    harness.shutdown.cancel();
}
