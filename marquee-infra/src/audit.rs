use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio::sync::mpsc;
use tracing::{info, warn};

use marquee_domain::events::{AuditError, AuditEvent, AuditPublisher};

/// Events buffered between the hot path and the bus before drops begin.
const DISPATCH_QUEUE_CAPACITY: usize = 1024;

/// Publishes audit events to the message bus, keyed by session so consumers
/// observe per-session publish order.
#[derive(Clone)]
pub struct KafkaAuditProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaAuditProducer {
    pub fn new(brokers: &str, topic: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.ms", "10")
            .create()?;

        info!("Kafka producer initialized for topic: {}", topic);
        Ok(Self {
            producer,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl AuditPublisher for KafkaAuditProducer {
    async fn publish(&self, event: AuditEvent) -> Result<(), AuditError> {
        let payload = serde_json::to_string(&event)?;
        let timestamp = event.timestamp.to_rfc3339();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "event_type",
                value: Some(event.event_type.as_str()),
            })
            .insert(Header {
                key: "timestamp",
                value: Some(timestamp.as_str()),
            });

        let record = FutureRecord::to(&self.topic)
            .key(&event.session_id)
            .payload(&payload)
            .headers(headers);

        match self
            .producer
            .send(record, Timeout::After(Duration::from_secs(0)))
            .await
        {
            Ok((partition, offset)) => {
                info!(
                    "Audit log sent: {} - {} (partition {} offset {})",
                    event.event_type.as_str(),
                    event.description,
                    partition,
                    offset
                );
                Ok(())
            }
            Err((err, _msg)) => Err(AuditError::Transport(err.to_string())),
        }
    }
}

/// Bounded hand-off between the hot path and the publisher. `enqueue` never
/// blocks and never fails the caller; overflow drops the event, warns, and
/// counts.
#[derive(Clone)]
pub struct AuditDispatcher {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
}

impl AuditDispatcher {
    pub fn spawn(publisher: Arc<dyn AuditPublisher>) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(DISPATCH_QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let event_type = event.event_type.as_str();
                if let Err(err) = publisher.publish(event).await {
                    warn!("Failed to publish audit event {}: {}", event_type, err);
                }
            }
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn enqueue(&self, event: AuditEvent) {
        if let Err(err) = self.tx.try_send(event) {
            let event = err.into_inner();
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Audit queue full, dropping event {}",
                event.event_type.as_str()
            );
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marquee_domain::events::AuditEventType;

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
    async fn dispatcher_forwards_events_to_the_publisher() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = AuditDispatcher::spawn(Arc::new(CollectingPublisher { tx }));

        dispatcher.enqueue(AuditEvent::seat_locked("S1", "u1", vec!["A1".to_string()]));

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("event not dispatched")
            .unwrap();
        assert_eq!(event.event_type, AuditEventType::SeatLocked);
        assert_eq!(event.session_id, "S1");
        assert_eq!(dispatcher.dropped(), 0);
    }
}
