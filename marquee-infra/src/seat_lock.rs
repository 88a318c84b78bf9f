use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::lock_store::{LockStore, StoreError};

/// How long a seat stays claimed without being booked or released.
pub const LOCK_DURATION: Duration = Duration::from_secs(300);

pub const LOCK_KEY_PREFIX: &str = "seat_lock:";

pub fn lock_key(session_id: &str, seat_id: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{session_id}:{seat_id}")
}

/// Split a lock key back into (session, seat). Returns None for keys outside
/// the scheme, including keys with extra or empty segments.
pub fn parse_lock_key(key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(LOCK_KEY_PREFIX)?;
    let (session_id, seat_id) = rest.split_once(':')?;
    if session_id.is_empty() || seat_id.is_empty() || seat_id.contains(':') {
        return None;
    }
    Some((session_id, seat_id))
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("seat is locked by another user")]
    LockedByAnother,
    #[error("lock does not exist")]
    NotFound,
    #[error("could not lock all seats, some are already locked")]
    Conflict { failed: Vec<String> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Enforces the per-seat lock protocol: ownership on release and extend,
/// all-or-nothing multi-seat acquisition with rollback. Contention is
/// resolved optimistically; no retries happen at this layer.
#[derive(Clone)]
pub struct SeatLockService {
    store: Arc<dyn LockStore>,
    ttl: Duration,
}

impl SeatLockService {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self::with_ttl(store, LOCK_DURATION)
    }

    pub fn with_ttl(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Claim a single seat. Ok(false) means someone else holds it.
    pub async fn lock_seat(
        &self,
        session_id: &str,
        seat_id: &str,
        user_id: &str,
    ) -> Result<bool, LockError> {
        let key = lock_key(session_id, seat_id);
        let acquired = self.store.create_if_absent(&key, user_id, self.ttl).await?;
        if acquired {
            info!("Lock acquired: key={}, user={}", key, user_id);
        }
        Ok(acquired)
    }

    /// Release a seat held by `user_id`. Releasing an absent lock succeeds
    /// (idempotent). The read-then-delete pair is not atomic; a lock whose
    /// TTL elapses in between makes the delete a no-op at worst.
    pub async fn unlock_seat(
        &self,
        session_id: &str,
        seat_id: &str,
        user_id: &str,
    ) -> Result<(), LockError> {
        let key = lock_key(session_id, seat_id);
        match self.store.get(&key).await? {
            None => Ok(()),
            Some(owner) if owner != user_id => Err(LockError::LockedByAnother),
            Some(_) => {
                self.store.delete(&key).await?;
                Ok(())
            }
        }
    }

    /// Current owner of the seat lock, or None when unlocked.
    pub async fn is_locked(
        &self,
        session_id: &str,
        seat_id: &str,
    ) -> Result<Option<String>, LockError> {
        let key = lock_key(session_id, seat_id);
        Ok(self.store.get(&key).await?)
    }

    pub async fn lock_ttl(
        &self,
        session_id: &str,
        seat_id: &str,
    ) -> Result<Option<Duration>, LockError> {
        let key = lock_key(session_id, seat_id);
        Ok(self.store.ttl(&key).await?)
    }

    /// Reset the TTL of a lock held by `user_id`.
    pub async fn extend_lock(
        &self,
        session_id: &str,
        seat_id: &str,
        user_id: &str,
    ) -> Result<(), LockError> {
        let key = lock_key(session_id, seat_id);
        match self.store.get(&key).await? {
            None => Err(LockError::NotFound),
            Some(owner) if owner != user_id => Err(LockError::LockedByAnother),
            Some(_) => {
                self.store.refresh_ttl(&key, self.ttl).await?;
                Ok(())
            }
        }
    }

    /// All-or-nothing claim of a seat set: one pipelined round-trip, then a
    /// rollback of our own partial acquisitions if any seat was contended.
    /// A rollback that fails part-way leaves locks that expire on their own.
    pub async fn lock_seats(
        &self,
        session_id: &str,
        seat_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<String>, LockError> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = seat_ids
            .iter()
            .map(|seat_id| lock_key(session_id, seat_id))
            .collect();
        let created = self.store.create_many_if_absent(&keys, user_id, self.ttl).await?;

        let mut locked = Vec::new();
        let mut failed = Vec::new();
        for (seat_id, acquired) in seat_ids.iter().zip(created) {
            if acquired {
                locked.push(seat_id.clone());
            } else {
                failed.push(seat_id.clone());
            }
        }

        if failed.is_empty() {
            info!("Locked {} seats in session {}: {}", locked.len(), session_id, locked.join(", "));
            return Ok(locked);
        }

        if !locked.is_empty() {
            for seat_id in &locked {
                if let Err(err) = self.unlock_seat(session_id, seat_id, user_id).await {
                    warn!("Rollback release failed for seat {}: {}", seat_id, err);
                }
            }
            return Err(LockError::Conflict {
                failed: seat_ids.to_vec(),
            });
        }

        Err(LockError::Conflict { failed })
    }

    /// Best-effort release of a seat set. Individual failures are logged and
    /// skipped; returns the seats that were actually released (or already
    /// absent).
    pub async fn unlock_seats(
        &self,
        session_id: &str,
        seat_ids: &[String],
        user_id: &str,
    ) -> Result<Vec<String>, LockError> {
        let mut released = Vec::new();
        for seat_id in seat_ids {
            match self.unlock_seat(session_id, seat_id, user_id).await {
                Ok(()) => released.push(seat_id.clone()),
                Err(err) => {
                    warn!("Failed to unlock seat {}: {}", seat_id, err);
                }
            }
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock_store::MemoryLockStore;

    fn service() -> SeatLockService {
        SeatLockService::new(Arc::new(MemoryLockStore::new()))
    }

    fn seats(labels: &[&str]) -> Vec<String> {
        labels.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lock_key_round_trips() {
        let key = lock_key("S1", "B7");
        assert_eq!(key, "seat_lock:S1:B7");
        assert_eq!(parse_lock_key(&key), Some(("S1", "B7")));
    }

    #[test]
    fn parse_rejects_foreign_and_malformed_keys() {
        assert_eq!(parse_lock_key("ratelimit:1.2.3.4"), None);
        assert_eq!(parse_lock_key("seat_lock:S1"), None);
        assert_eq!(parse_lock_key("seat_lock:S1:"), None);
        assert_eq!(parse_lock_key("seat_lock::B7"), None);
        assert_eq!(parse_lock_key("seat_lock:S1:B7:extra"), None);
    }

    #[tokio::test]
    async fn only_one_user_can_hold_a_seat() {
        let locks = service();
        assert!(locks.lock_seat("S1", "A1", "u1").await.unwrap());
        assert!(!locks.lock_seat("S1", "A1", "u2").await.unwrap());
        assert_eq!(
            locks.is_locked("S1", "A1").await.unwrap(),
            Some("u1".to_string())
        );
    }

    #[tokio::test]
    async fn release_is_ownership_checked_and_idempotent() {
        let locks = service();
        locks.lock_seat("S1", "A1", "u1").await.unwrap();

        let denied = locks.unlock_seat("S1", "A1", "u2").await;
        assert!(matches!(denied, Err(LockError::LockedByAnother)));
        assert_eq!(
            locks.is_locked("S1", "A1").await.unwrap(),
            Some("u1".to_string())
        );

        locks.unlock_seat("S1", "A1", "u1").await.unwrap();
        assert_eq!(locks.is_locked("S1", "A1").await.unwrap(), None);

        // Releasing again is a no-op.
        locks.unlock_seat("S1", "A1", "u1").await.unwrap();
    }

    #[tokio::test]
    async fn extend_requires_a_live_owned_lock() {
        let locks = service();

        let missing = locks.extend_lock("S1", "A1", "u1").await;
        assert!(matches!(missing, Err(LockError::NotFound)));

        locks.lock_seat("S1", "A1", "u1").await.unwrap();
        let denied = locks.extend_lock("S1", "A1", "u2").await;
        assert!(matches!(denied, Err(LockError::LockedByAnother)));

        locks.extend_lock("S1", "A1", "u1").await.unwrap();
        assert!(locks.lock_ttl("S1", "A1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn multi_acquire_takes_all_seats_when_uncontended() {
        let locks = service();
        let locked = locks
            .lock_seats("S1", &seats(&["A1", "A2", "A3"]), "u1")
            .await
            .unwrap();
        assert_eq!(locked, seats(&["A1", "A2", "A3"]));

        for seat in ["A1", "A2", "A3"] {
            assert_eq!(
                locks.is_locked("S1", seat).await.unwrap(),
                Some("u1".to_string())
            );
        }
    }

    #[tokio::test]
    async fn contended_multi_acquire_rolls_back_completely() {
        let locks = service();
        locks.lock_seat("S1", "A1", "u1").await.unwrap();

        let err = locks
            .lock_seats("S1", &seats(&["A1", "A2"]), "u2")
            .await
            .unwrap_err();
        match err {
            LockError::Conflict { failed } => assert_eq!(failed, seats(&["A1", "A2"])),
            other => panic!("unexpected error: {other:?}"),
        }

        // u2 holds nothing after the failed attempt; u1 keeps A1.
        assert_eq!(locks.is_locked("S1", "A2").await.unwrap(), None);
        assert_eq!(
            locks.is_locked("S1", "A1").await.unwrap(),
            Some("u1".to_string())
        );
    }

    #[tokio::test]
    async fn fully_contended_multi_acquire_reports_every_seat() {
        let locks = service();
        locks
            .lock_seats("S1", &seats(&["A1", "A2"]), "u1")
            .await
            .unwrap();

        let err = locks
            .lock_seats("S1", &seats(&["A1", "A2"]), "u2")
            .await
            .unwrap_err();
        match err {
            LockError::Conflict { failed } => assert_eq!(failed, seats(&["A1", "A2"])),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_multi_acquire_succeeds_with_no_locks() {
        let locks = service();
        let locked = locks.lock_seats("S1", &[], "u1").await.unwrap();
        assert!(locked.is_empty());
    }

    #[tokio::test]
    async fn multi_release_skips_seats_held_by_others() {
        let locks = service();
        locks.lock_seat("S1", "A1", "u1").await.unwrap();
        locks.lock_seat("S1", "A2", "u2").await.unwrap();

        let released = locks
            .unlock_seats("S1", &seats(&["A1", "A2", "A3"]), "u1")
            .await
            .unwrap();
        // A1 was ours, A3 was absent; A2 belongs to u2 and stays put.
        assert_eq!(released, seats(&["A1", "A3"]));
        assert_eq!(
            locks.is_locked("S1", "A2").await.unwrap(),
            Some("u2".to_string())
        );
    }

    #[tokio::test]
    async fn locks_expire_within_their_ttl() {
        let store = Arc::new(MemoryLockStore::new());
        let locks = SeatLockService::with_ttl(store, Duration::from_millis(60));

        locks.lock_seat("S1", "B5", "u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(locks.is_locked("S1", "B5").await.unwrap(), None);
        // The seat is claimable again after expiry.
        assert!(locks.lock_seat("S1", "B5", "u2").await.unwrap());
    }
}
