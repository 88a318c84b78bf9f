use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use marquee_domain::events::WsServerMessage;
use marquee_domain::seat::SeatUpdate;

/// Frames queued per subscriber before it is considered too slow to keep.
pub const OUTBOUND_BUFFER: usize = 256;

/// One live viewer. The hub holds a clone in its registry; the connection
/// task holds another for direct replies (PONG) and shutdown signalling.
#[derive(Clone)]
pub struct Subscriber {
    pub id: Uuid,
    pub user_id: String,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl Subscriber {
    pub fn new(user_id: &str) -> (Self, mpsc::Receiver<String>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (
            Self {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                outbound,
                cancel: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Queue a frame for this subscriber without blocking. Frames that do
    /// not fit are dropped; the hub-side path evicts on the same condition.
    pub fn send_frame(&self, frame: String) {
        let _ = self.outbound.try_send(frame);
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

enum HubCommand {
    Register {
        session_id: String,
        subscriber: Subscriber,
    },
    Unregister {
        session_id: String,
        subscriber_id: Uuid,
    },
    Switch {
        from: String,
        to: String,
        subscriber: Subscriber,
    },
    Broadcast {
        session_id: String,
        frame: String,
    },
}

enum RemoveReason {
    Disconnect,
    Evict,
    Switch,
}

struct HubShared {
    sessions: RwLock<HashMap<String, HashMap<Uuid, Subscriber>>>,
    evictions: AtomicU64,
}

/// Session-scoped fan-out of seat-status frames. Mutations are serialized
/// through a single command loop; the registry lock only guards read-only
/// inspections against the loop's writes.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::UnboundedSender<HubCommand>,
    shared: Arc<HubShared>,
}

impl Hub {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let shared = Arc::new(HubShared {
            sessions: RwLock::new(HashMap::new()),
            evictions: AtomicU64::new(0),
        });

        let loop_shared = Arc::clone(&shared);
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                loop_shared.handle(cmd);
            }
        });

        Self { tx, shared }
    }

    pub fn register(&self, session_id: &str, subscriber: Subscriber) {
        let _ = self.tx.send(HubCommand::Register {
            session_id: session_id.to_string(),
            subscriber,
        });
    }

    /// Remove the subscriber and close its outbound buffer.
    pub fn unregister(&self, session_id: &str, subscriber_id: Uuid) {
        let _ = self.tx.send(HubCommand::Unregister {
            session_id: session_id.to_string(),
            subscriber_id,
        });
    }

    /// Atomic unregister-then-re-register under a new session. The
    /// subscriber keeps its buffer, so no frame queued for the old session
    /// leaks into the new one and vice versa.
    pub fn switch_session(&self, from: &str, to: &str, subscriber: Subscriber) {
        let _ = self.tx.send(HubCommand::Switch {
            from: from.to_string(),
            to: to.to_string(),
            subscriber,
        });
    }

    pub fn broadcast_seat_update(&self, session_id: &str, update: SeatUpdate) {
        let seat_id = update.seat_id.clone();
        let status = update.status;
        let message = WsServerMessage::SeatUpdate {
            session_id: session_id.to_string(),
            data: update,
        };
        self.broadcast_message(session_id, &message);
        info!(
            "Broadcast seat update: session={}, seat={}, status={}",
            session_id, seat_id, status
        );
    }

    pub fn broadcast_seat_updates(&self, session_id: &str, updates: Vec<SeatUpdate>) {
        let count = updates.len();
        let message = WsServerMessage::SeatsUpdate {
            session_id: session_id.to_string(),
            data: updates,
        };
        self.broadcast_message(session_id, &message);
        info!("Broadcast {} seat updates for session={}", count, session_id);
    }

    fn broadcast_message(&self, session_id: &str, message: &WsServerMessage) {
        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(err) => {
                error!("Error encoding seat update: {}", err);
                return;
            }
        };
        let _ = self.tx.send(HubCommand::Broadcast {
            session_id: session_id.to_string(),
            frame,
        });
    }

    pub fn client_count(&self, session_id: &str) -> usize {
        let sessions = self.shared.sessions.read().expect("hub registry poisoned");
        sessions.get(session_id).map(|subs| subs.len()).unwrap_or(0)
    }

    pub fn total_clients(&self) -> usize {
        let sessions = self.shared.sessions.read().expect("hub registry poisoned");
        sessions.values().map(|subs| subs.len()).sum()
    }

    /// Subscribers force-dropped for falling behind, since startup.
    pub fn evictions(&self) -> u64 {
        self.shared.evictions.load(Ordering::Relaxed)
    }
}

impl HubShared {
    fn handle(&self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { session_id, subscriber } => {
                self.insert(&session_id, subscriber);
            }
            HubCommand::Unregister { session_id, subscriber_id } => {
                self.remove(&session_id, subscriber_id, RemoveReason::Disconnect);
            }
            HubCommand::Switch { from, to, subscriber } => {
                self.remove(&from, subscriber.id, RemoveReason::Switch);
                self.insert(&to, subscriber);
            }
            HubCommand::Broadcast { session_id, frame } => {
                let stalled: Vec<Uuid> = {
                    let sessions = self.sessions.read().expect("hub registry poisoned");
                    let Some(subs) = sessions.get(&session_id) else {
                        return;
                    };
                    subs.values()
                        .filter(|sub| sub.outbound.try_send(frame.clone()).is_err())
                        .map(|sub| sub.id)
                        .collect()
                };
                for subscriber_id in stalled {
                    self.remove(&session_id, subscriber_id, RemoveReason::Evict);
                }
            }
        }
    }

    fn insert(&self, session_id: &str, subscriber: Subscriber) {
        let mut sessions = self.sessions.write().expect("hub registry poisoned");
        info!(
            "Client connected: session={}, user={}",
            session_id, subscriber.user_id
        );
        sessions
            .entry(session_id.to_string())
            .or_default()
            .insert(subscriber.id, subscriber);
    }

    fn remove(&self, session_id: &str, subscriber_id: Uuid, reason: RemoveReason) {
        let mut sessions = self.sessions.write().expect("hub registry poisoned");
        let Some(subs) = sessions.get_mut(session_id) else {
            return;
        };
        if let Some(subscriber) = subs.remove(&subscriber_id) {
            match reason {
                // A session switch keeps the subscriber's pumps running.
                RemoveReason::Switch => {}
                RemoveReason::Disconnect => {
                    subscriber.stop();
                    info!(
                        "Client disconnected: session={}, user={}",
                        session_id, subscriber.user_id
                    );
                }
                RemoveReason::Evict => {
                    subscriber.stop();
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Evicting slow subscriber: session={}, user={}",
                        session_id, subscriber.user_id
                    );
                }
            }
        }
        if subs.is_empty() {
            sessions.remove(session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use marquee_domain::seat::SeatStatus;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within deadline");
    }

    async fn recv_frame(rx: &mut mpsc::Receiver<String>) -> serde_json::Value {
        let frame = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no frame delivered")
            .expect("subscriber buffer closed");
        serde_json::from_str(&frame).unwrap()
    }

    #[tokio::test]
    async fn broadcast_reaches_registered_subscribers() {
        let hub = Hub::spawn();
        let (sub, mut rx) = Subscriber::new("u1");
        hub.register("S1", sub);

        hub.broadcast_seat_update("S1", SeatUpdate::locked("A1", "u1"));

        let frame = recv_frame(&mut rx).await;
        assert_eq!(frame["type"], "SEAT_UPDATE");
        assert_eq!(frame["sessionId"], "S1");
        assert_eq!(frame["data"]["seatId"], "A1");
        assert_eq!(frame["data"]["status"], SeatStatus::Locked.as_str());
    }

    #[tokio::test]
    async fn broadcast_to_empty_session_is_a_no_op() {
        let hub = Hub::spawn();
        let (sub, mut rx) = Subscriber::new("u1");

        hub.broadcast_seat_update("S1", SeatUpdate::available("A1"));
        hub.register("S1", sub);
        hub.broadcast_seat_update("S1", SeatUpdate::available("A2"));

        // Only the frame broadcast after registration arrives.
        let frame = recv_frame(&mut rx).await;
        assert_eq!(frame["data"]["seatId"], "A2");
    }

    #[tokio::test]
    async fn session_switch_stops_old_session_delivery() {
        let hub = Hub::spawn();
        let (sub, mut rx) = Subscriber::new("u1");
        hub.register("S1", sub.clone());

        hub.broadcast_seat_update("S1", SeatUpdate::available("A1"));
        hub.switch_session("S1", "S2", sub.clone());
        hub.broadcast_seat_update("S1", SeatUpdate::available("A2"));
        hub.broadcast_seat_update("S2", SeatUpdate::available("B1"));

        let first = recv_frame(&mut rx).await;
        assert_eq!(first["sessionId"], "S1");
        assert_eq!(first["data"]["seatId"], "A1");

        // The S1 frame sent after the switch is never delivered.
        let second = recv_frame(&mut rx).await;
        assert_eq!(second["sessionId"], "S2");
        assert_eq!(second["data"]["seatId"], "B1");

        assert!(!sub.is_cancelled(), "switch must not close the subscriber");
        assert_eq!(hub.client_count("S1"), 0);
        assert_eq!(hub.client_count("S2"), 1);
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_on_full_buffer() {
        let hub = Hub::spawn();
        let (slow, _slow_rx) = Subscriber::new("slow");
        let (fast, mut fast_rx) = Subscriber::new("fast");
        hub.register("S1", slow.clone());
        hub.register("S1", fast);
        wait_until(|| hub.client_count("S1") == 2).await;

        // Fill the slow subscriber's buffer, then one more broadcast.
        for n in 0..=OUTBOUND_BUFFER {
            hub.broadcast_seat_update("S1", SeatUpdate::available(format!("A{n}")));
            // Keep the fast consumer drained so only the slow one stalls.
            let _ = recv_frame(&mut fast_rx).await;
        }

        wait_until(|| hub.client_count("S1") == 1).await;
        assert_eq!(hub.evictions(), 1);
        assert!(slow.is_cancelled());
    }

    #[tokio::test]
    async fn unregister_closes_the_subscriber() {
        let hub = Hub::spawn();
        let (sub, _rx) = Subscriber::new("u1");
        hub.register("S1", sub.clone());
        wait_until(|| hub.total_clients() == 1).await;

        hub.unregister("S1", sub.id);
        wait_until(|| hub.total_clients() == 0).await;
        assert!(sub.is_cancelled());
    }
}
