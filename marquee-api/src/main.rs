use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marquee_api::bookings::BookingCoordinator;
use marquee_api::hub::Hub;
use marquee_api::monitor::LockExpiryMonitor;
use marquee_api::worker::run_audit_consumer;
use marquee_api::{app, AppState};
use marquee_infra::config::Config;
use marquee_infra::{
    AuditDispatcher, AuditLogRepository, BookingRepository, DbClient, EmailNotifier,
    KafkaAuditProducer, LockStore, RedisLockStore, SeatLockService, SessionRepository,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marquee_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().expect("Failed to load config");
    tracing::info!("Starting Marquee API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let lock_store: Arc<dyn LockStore> = Arc::new(
        RedisLockStore::new(&config.redis.url).expect("Failed to create Redis client"),
    );
    let locks = SeatLockService::with_ttl(
        Arc::clone(&lock_store),
        Duration::from_secs(config.business_rules.seat_lock_seconds),
    );

    let producer = KafkaAuditProducer::new(&config.kafka.brokers, &config.kafka.topic)
        .expect("Failed to create Kafka producer");
    let audit = AuditDispatcher::spawn(Arc::new(producer));

    let hub = Hub::spawn();
    let notifier = Arc::new(EmailNotifier::new(config.smtp.as_ref()));

    let sessions = SessionRepository::new(db.pool.clone());
    let bookings = BookingRepository::new(db.pool.clone());
    let audit_logs = AuditLogRepository::new(db.pool.clone());

    let shutdown = CancellationToken::new();

    tokio::spawn(
        LockExpiryMonitor::new(Arc::clone(&lock_store), hub.clone(), audit.clone())
            .run(shutdown.child_token()),
    );
    tokio::spawn(run_audit_consumer(
        config.kafka.brokers.clone(),
        config.kafka.topic.clone(),
        config.kafka.consumer_group.clone(),
        audit_logs,
        shutdown.child_token(),
    ));

    let coordinator = BookingCoordinator::new(
        sessions.clone(),
        bookings,
        locks.clone(),
        hub.clone(),
        audit.clone(),
        Arc::clone(&notifier),
    );

    let state = AppState {
        sessions,
        locks,
        audit,
        hub,
        coordinator,
    };

    let app = app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);
    tracing::info!("WebSocket endpoint: ws://{}/ws", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.cancel();
        })
        .await
        .expect("Server error");
}
