use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

/// Deadline applied to every store round-trip.
const OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis channel carrying TTL-expiry notifications for database 0.
const EXPIRED_EVENT_CHANNEL: &str = "__keyevent@0__:expired";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lock store unavailable: {0}")]
    Backend(#[from] redis::RedisError),
    #[error("lock store operation timed out")]
    Timeout,
    #[error("expiry subscription failed: {0}")]
    Subscribe(String),
}

/// Capability interface over a TTL-aware key-value store. The seat-lock
/// protocol is written against this seam; `RedisLockStore` backs production
/// and `MemoryLockStore` backs tests and broker-less local runs.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key` to `value` with `ttl` only if absent. Returns whether the
    /// entry was created.
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional delete; ownership checks happen in the caller.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Remaining TTL, or None when the key is absent.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Reset the TTL if the key exists. Returns whether it did.
    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Pipelined conditional creates, one round-trip, same value and TTL for
    /// every key. Result order matches `keys`.
    async fn create_many_if_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> Result<Vec<bool>, StoreError>;

    /// Stream of keys whose TTL elapsed. Keys removed by `delete` never
    /// appear here.
    async fn subscribe_expired(&self) -> Result<mpsc::Receiver<String>, StoreError>;
}

#[derive(Clone)]
pub struct RedisLockStore {
    client: redis::Client,
}

impl RedisLockStore {
    pub fn new(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }

    async fn deadline<T, F>(fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        match tokio::time::timeout(OP_TIMEOUT, fut).await {
            Ok(res) => res.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let created: Option<String> = Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut con)
                .await
        })
        .await?;

        Ok(created.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            con.get(key).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: i64 = Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            con.del(key).await
        })
        .await?;

        Ok(removed > 0)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let remaining: i64 = Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            con.ttl(key).await
        })
        .await?;

        // Redis reports -2 for a missing key and -1 for a key without TTL.
        if remaining < 0 {
            Ok(None)
        } else {
            Ok(Some(Duration::from_secs(remaining as u64)))
        }
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            con.expire(key, ttl.as_secs() as i64).await
        })
        .await
    }

    async fn create_many_if_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> Result<Vec<bool>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let results: Vec<Option<String>> = Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            let mut pipe = redis::pipe();
            for key in keys {
                pipe.cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs());
            }
            pipe.query_async(&mut con).await
        })
        .await?;

        Ok(results.into_iter().map(|r| r.is_some()).collect())
    }

    async fn subscribe_expired(&self) -> Result<mpsc::Receiver<String>, StoreError> {
        // Keyspace expiry notifications are off by default.
        Self::deadline(async {
            let mut con = self.client.get_async_connection().await?;
            redis::cmd("CONFIG")
                .arg("SET")
                .arg("notify-keyspace-events")
                .arg("Ex")
                .query_async::<_, ()>(&mut con)
                .await
        })
        .await?;

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;
        pubsub
            .psubscribe(EXPIRED_EVENT_CHANNEL)
            .await
            .map_err(|e| StoreError::Subscribe(e.to_string()))?;

        info!("Subscribed to key expiry events on {}", EXPIRED_EVENT_CHANNEL);

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let key: String = match msg.get_payload() {
                    Ok(key) => key,
                    Err(err) => {
                        warn!("Ignoring malformed expiry notification: {}", err);
                        continue;
                    }
                };
                if tx.send(key).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-process `LockStore` with a background sweeper emitting expiry events.
/// Must be created inside a Tokio runtime.
pub struct MemoryLockStore {
    entries: Arc<Mutex<HashMap<String, MemoryEntry>>>,
    expired_tx: broadcast::Sender<String>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        let entries: Arc<Mutex<HashMap<String, MemoryEntry>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let (expired_tx, _) = broadcast::channel(1024);

        let sweep_entries = Arc::clone(&entries);
        let sweep_tx = expired_tx.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(20));
            loop {
                tick.tick().await;
                let now = Instant::now();
                let expired: Vec<String> = {
                    let mut map = sweep_entries.lock().await;
                    let keys: Vec<String> = map
                        .iter()
                        .filter(|(_, entry)| entry.expires_at <= now)
                        .map(|(key, _)| key.clone())
                        .collect();
                    for key in &keys {
                        map.remove(key);
                    }
                    keys
                };
                for key in expired {
                    let _ = sweep_tx.send(key);
                }
            }
        });

        Self { entries, expired_tx }
    }

    fn live<'a>(map: &'a HashMap<String, MemoryEntry>, key: &str) -> Option<&'a MemoryEntry> {
        // The sweeper lags by one tick; treat stale entries as absent.
        map.get(key).filter(|entry| entry.expires_at > Instant::now())
    }
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        if Self::live(&map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.entries.lock().await;
        Ok(Self::live(&map, key).map(|entry| entry.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        Ok(map.remove(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let mut map = self.entries.lock().await;
        Ok(Self::live(&map, key)
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }

    async fn refresh_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        if Self::live(&map, key).is_none() {
            return Ok(false);
        }
        if let Some(entry) = map.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
        Ok(true)
    }

    async fn create_many_if_absent(
        &self,
        keys: &[String],
        value: &str,
        ttl: Duration,
    ) -> Result<Vec<bool>, StoreError> {
        // Single lock across the batch, mirroring the pipelined round-trip.
        let mut map = self.entries.lock().await;
        let now = Instant::now();
        let mut created = Vec::with_capacity(keys.len());
        for key in keys {
            if Self::live(&map, key).is_some() {
                created.push(false);
            } else {
                map.insert(
                    key.clone(),
                    MemoryEntry {
                        value: value.to_string(),
                        expires_at: now + ttl,
                    },
                );
                created.push(true);
            }
        }
        Ok(created)
    }

    async fn subscribe_expired(&self) -> Result<mpsc::Receiver<String>, StoreError> {
        let mut expired_rx = self.expired_tx.subscribe();
        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(async move {
            loop {
                match expired_rx.recv().await {
                    Ok(key) => {
                        if tx.send(key).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Expiry subscriber lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
