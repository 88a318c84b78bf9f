use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use marquee_domain::events::AuditEvent;
use marquee_infra::AuditLogRepository;

/// Durable tail of the audit stream: reads from the earliest committed
/// offset and persists every event to the event log. Delivery is
/// at-least-once; each insert gets a fresh identity when the payload
/// carries none.
pub async fn run_audit_consumer(
    brokers: String,
    topic: String,
    group_id: String,
    audit_logs: AuditLogRepository,
    shutdown: CancellationToken,
) {
    let consumer: StreamConsumer = match ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        .set("auto.offset.reset", "earliest")
        .create()
    {
        Ok(consumer) => consumer,
        Err(err) => {
            error!("Audit consumer creation failed: {}", err);
            return;
        }
    };

    if let Err(err) = consumer.subscribe(&[topic.as_str()]) {
        error!("Audit consumer could not subscribe to {}: {}", topic, err);
        return;
    }

    info!("Audit consumer started, listening for audit logs...");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Audit consumer stopped");
                return;
            }
            received = consumer.recv() => match received {
                Err(err) => error!("Kafka error: {}", err),
                Ok(message) => {
                    let Some(Ok(payload)) = message.payload_view::<str>() else {
                        warn!("Skipping audit message with non-UTF8 payload");
                        continue;
                    };
                    match serde_json::from_str::<AuditEvent>(payload) {
                        Ok(mut event) => {
                            if event.id.is_none() {
                                event.id = Some(Uuid::new_v4());
                            }
                            match audit_logs.insert(&event).await {
                                Ok(()) => info!(
                                    "Audit log saved: {} - {}",
                                    event.event_type.as_str(),
                                    event.description
                                ),
                                Err(err) => warn!("Failed to persist audit log: {}", err),
                            }
                        }
                        Err(err) => warn!("Error parsing audit message: {}", err),
                    }
                }
            }
        }
    }
}
