pub mod audit;
pub mod config;
pub mod database;
pub mod email;
pub mod lock_store;
pub mod repository;
pub mod seat_lock;

pub use audit::{AuditDispatcher, KafkaAuditProducer};
pub use database::DbClient;
pub use email::EmailNotifier;
pub use lock_store::{LockStore, MemoryLockStore, RedisLockStore, StoreError};
pub use repository::{AuditLogRepository, BookingRepository, SessionRepository};
pub use seat_lock::{LockError, SeatLockService};
