//! In-Memory Repository Implementations
//!
//! Single-process stores behind std mutexes. Each operation holds one lock
//! for its whole read-modify-write, which is what makes `take`,
//! `insert_if_absent` and `find_or_create` atomic.

use crate::domain::entities::{
    DeviceRecord, HandshakeSession, LoaderSession, LoginAttempt, RiskEvent,
};
use crate::domain::repository::{
    DeviceRecordRepository, HandshakeSessionStore, LoaderSessionStore, LoginLogRepository,
    NonceRepository, RiskEventRepository,
};
use crate::domain::value_objects::RiskScore;
use crate::error::{LoaderError, LoaderResult};
use kernel::id::{DeviceRecordId, HandshakeSessionId, LoaderSessionId};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> LoaderResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| LoaderError::Internal("store lock poisoned".into()))
}

/// In-memory repository
#[derive(Default)]
pub struct MemoryLoaderRepository {
    handshakes: Mutex<HashMap<HandshakeSessionId, HandshakeSession>>,
    sessions: Mutex<HashMap<LoaderSessionId, LoaderSession>>,
    /// nonce -> expires_at_ms
    nonces: Mutex<HashMap<String, i64>>,
    devices: Mutex<HashMap<DeviceRecordId, DeviceRecord>>,
    risk_events: Mutex<Vec<RiskEvent>>,
    logins: Mutex<Vec<LoginAttempt>>,
}

impl MemoryLoaderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record unconditionally, for tests that need several per pair
    #[cfg(test)]
    pub(crate) fn seed_device(&self, record: &DeviceRecord) {
        self.devices
            .lock()
            .unwrap()
            .insert(record.id, record.clone());
    }
}

fn newest_for_pair<'a>(
    devices: &'a HashMap<DeviceRecordId, DeviceRecord>,
    user_id: &str,
    license_id: &str,
) -> Option<&'a DeviceRecord> {
    devices
        .values()
        .filter(|r| r.user_id == user_id && r.license_id == license_id)
        .max_by_key(|r| r.last_seen_at)
}

impl HandshakeSessionStore for MemoryLoaderRepository {
    async fn put(&self, session: &HandshakeSession) -> LoaderResult<()> {
        lock(&self.handshakes)?.insert(session.id, session.clone());
        Ok(())
    }

    async fn take(
        &self,
        session_id: HandshakeSessionId,
    ) -> LoaderResult<Option<HandshakeSession>> {
        Ok(lock(&self.handshakes)?.remove(&session_id))
    }

    async fn sweep_expired(&self, cutoff_ms: i64) -> LoaderResult<u64> {
        let mut sessions = lock(&self.handshakes)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at_ms >= cutoff_ms);
        Ok((before - sessions.len()) as u64)
    }
}

impl LoaderSessionStore for MemoryLoaderRepository {
    async fn insert_session(&self, session: &LoaderSession) -> LoaderResult<()> {
        lock(&self.sessions)?.insert(session.id, session.clone());
        Ok(())
    }

    async fn find_session(&self, session_id: LoaderSessionId) -> LoaderResult<Option<LoaderSession>> {
        Ok(lock(&self.sessions)?.get(&session_id).cloned())
    }

    async fn bind_session_user(
        &self,
        session_id: LoaderSessionId,
        user_id: &str,
        license_id: &str,
    ) -> LoaderResult<bool> {
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(&session_id) {
            Some(session) if session.is_active => {
                session.user_id = Some(user_id.to_string());
                session.license_id = Some(license_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch_session(&self, session_id: LoaderSessionId, now_ms: i64) -> LoaderResult<bool> {
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(&session_id) {
            Some(session) if session.is_active && !session.is_expired_at(now_ms) => {
                session.last_heartbeat_ms = Some(now_ms);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(&self, session_id: LoaderSessionId) -> LoaderResult<bool> {
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(&session_id) {
            Some(session) if session.is_active => {
                session.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_sessions(&self, now_ms: i64) -> LoaderResult<u64> {
        let mut sessions = lock(&self.sessions)?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired_at(now_ms));
        Ok((before - sessions.len()) as u64)
    }
}

impl NonceRepository for MemoryLoaderRepository {
    async fn insert_if_absent(&self, nonce: &str, expires_at_ms: i64) -> LoaderResult<bool> {
        let mut nonces = lock(&self.nonces)?;
        // An expired but unpurged nonce still counts as used
        if nonces.contains_key(nonce) {
            return Ok(false);
        }
        nonces.insert(nonce.to_string(), expires_at_ms);
        Ok(true)
    }

    async fn purge_expired(&self, now_ms: i64) -> LoaderResult<u64> {
        let mut nonces = lock(&self.nonces)?;
        let before = nonces.len();
        nonces.retain(|_, expires_at_ms| *expires_at_ms >= now_ms);
        Ok((before - nonces.len()) as u64)
    }
}

impl DeviceRecordRepository for MemoryLoaderRepository {
    async fn find(&self, user_id: &str, license_id: &str) -> LoaderResult<Option<DeviceRecord>> {
        let devices = lock(&self.devices)?;
        Ok(newest_for_pair(&devices, user_id, license_id).cloned())
    }

    async fn find_or_create(&self, record: &DeviceRecord) -> LoaderResult<(DeviceRecord, bool)> {
        let mut devices = lock(&self.devices)?;
        if let Some(existing) = newest_for_pair(&devices, &record.user_id, &record.license_id) {
            return Ok((existing.clone(), false));
        }
        devices.insert(record.id, record.clone());
        Ok((record.clone(), true))
    }

    async fn update(&self, record: &DeviceRecord) -> LoaderResult<()> {
        let mut devices = lock(&self.devices)?;
        let stored = devices
            .get_mut(&record.id)
            .ok_or_else(|| LoaderError::Internal(format!("device record {} missing", record.id)))?;
        stored.components = record.components.clone();
        stored.composite_fingerprint = record.composite_fingerprint.clone();
        stored.change_count = record.change_count;
        stored.last_seen_at = record.last_seen_at;
        Ok(())
    }

    async fn count(&self, user_id: &str, license_id: &str) -> LoaderResult<u64> {
        Ok(lock(&self.devices)?
            .values()
            .filter(|r| r.user_id == user_id && r.license_id == license_id)
            .count() as u64)
    }

    async fn set_flag(&self, record_id: DeviceRecordId, reason: &str) -> LoaderResult<bool> {
        let mut devices = lock(&self.devices)?;
        match devices.get_mut(&record_id) {
            Some(record) => {
                record.is_flagged = true;
                record.flag_reason = Some(reason.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_risk_score(
        &self,
        record_id: DeviceRecordId,
        score: RiskScore,
    ) -> LoaderResult<()> {
        if let Some(record) = lock(&self.devices)?.get_mut(&record_id) {
            record.risk_score = score;
        }
        Ok(())
    }
}

impl RiskEventRepository for MemoryLoaderRepository {
    async fn append(&self, event: &RiskEvent) -> LoaderResult<()> {
        lock(&self.risk_events)?.push(event.clone());
        Ok(())
    }

    async fn count_since(
        &self,
        user_id: &str,
        license_id: &str,
        since_ms: i64,
    ) -> LoaderResult<u64> {
        // Collect ids first so the two locks are never held together
        let record_ids: HashSet<DeviceRecordId> = lock(&self.devices)?
            .values()
            .filter(|r| r.user_id == user_id && r.license_id == license_id)
            .map(|r| r.id)
            .collect();

        Ok(lock(&self.risk_events)?
            .iter()
            .filter(|e| record_ids.contains(&e.device_record_id) && e.created_at_ms >= since_ms)
            .count() as u64)
    }
}

impl LoginLogRepository for MemoryLoaderRepository {
    async fn record(&self, attempt: &LoginAttempt) -> LoaderResult<()> {
        lock(&self.logins)?.push(attempt.clone());
        Ok(())
    }

    async fn recent_locations(
        &self,
        user_id: &str,
        since_ms: i64,
        limit: usize,
    ) -> LoaderResult<Vec<Option<String>>> {
        let logins = lock(&self.logins)?;
        let mut recent: Vec<&LoginAttempt> = logins
            .iter()
            .filter(|a| a.user_id.as_deref() == Some(user_id) && a.created_at_ms >= since_ms)
            .collect();
        recent.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        Ok(recent
            .into_iter()
            .take(limit)
            .map(|a| a.geo_location.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{FingerprintComponents, RiskEventType};

    fn session() -> HandshakeSession {
        HandshakeSession::new(
            "00".repeat(64),
            "pem".into(),
            "fp".into(),
            "1.2.3.4".parse().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_take_is_single_use() {
        let repo = MemoryLoaderRepository::new();
        let s = session();
        repo.put(&s).await.unwrap();

        assert!(repo.take(s.id).await.unwrap().is_some());
        assert!(repo.take(s.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_old_sessions() {
        let repo = MemoryLoaderRepository::new();
        let mut old = session();
        old.created_at_ms -= 120_000;
        let fresh = session();
        repo.put(&old).await.unwrap();
        repo.put(&fresh).await.unwrap();

        let cutoff = fresh.created_at_ms - 60_000;
        assert_eq!(repo.sweep_expired(cutoff).await.unwrap(), 1);
        assert!(repo.take(old.id).await.unwrap().is_none());
        assert!(repo.take(fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_find_or_create_keeps_first_record() {
        let repo = MemoryLoaderRepository::new();
        let first = DeviceRecord::first_sighting("u", "l", FingerprintComponents::default(), "a".into());
        let second = DeviceRecord::first_sighting("u", "l", FingerprintComponents::default(), "b".into());

        let (stored, created) = repo.find_or_create(&first).await.unwrap();
        assert!(created);
        assert_eq!(stored.id, first.id);

        let (stored, created) = repo.find_or_create(&second).await.unwrap();
        assert!(!created);
        assert_eq!(stored.id, first.id);
        assert_eq!(repo.count("u", "l").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let repo = MemoryLoaderRepository::new();
        let session = LoaderSession::new(
            platform::crypto::SessionKey::from_bytes([3u8; 32]),
            "fp".into(),
            "1.2.3.4".parse().unwrap(),
            60_000,
        );
        repo.insert_session(&session).await.unwrap();

        assert!(repo.bind_session_user(session.id, "alice", "premium").await.unwrap());
        assert!(repo.touch_session(session.id, session.created_at_ms + 1).await.unwrap());
        assert!(!repo.touch_session(session.id, session.expires_at_ms + 1).await.unwrap());

        let stored = repo.find_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.identity(), Some(("alice", "premium")));
        assert_eq!(stored.last_heartbeat_ms, Some(session.created_at_ms + 1));

        assert!(repo.revoke_session(session.id).await.unwrap());
        assert!(!repo.revoke_session(session.id).await.unwrap());
        assert!(!repo.bind_session_user(session.id, "mallory", "x").await.unwrap());

        assert_eq!(repo.purge_sessions(session.expires_at_ms).await.unwrap(), 0);
        assert_eq!(repo.purge_sessions(session.expires_at_ms + 1).await.unwrap(), 1);
        assert!(repo.find_session(session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nonce_insert_and_purge() {
        let repo = MemoryLoaderRepository::new();
        assert!(repo.insert_if_absent("n1", 1_000).await.unwrap());
        assert!(!repo.insert_if_absent("n1", 5_000).await.unwrap());

        assert_eq!(repo.purge_expired(2_000).await.unwrap(), 1);
        assert!(repo.insert_if_absent("n1", 5_000).await.unwrap());
    }

    #[tokio::test]
    async fn test_risk_events_scoped_to_pair_and_window() {
        let repo = MemoryLoaderRepository::new();
        let empty = FingerprintComponents::default;
        let mine = DeviceRecord::first_sighting("u", "l", empty(), "a".into());
        let other = DeviceRecord::first_sighting("u", "other", empty(), "b".into());
        repo.seed_device(&mine);
        repo.seed_device(&other);

        let recent = RiskEvent::new(mine.id, RiskEventType::VmDetected, 40, "vm", None);
        let mut old = RiskEvent::new(mine.id, RiskEventType::VmDetected, 40, "vm", None);
        old.created_at_ms -= 10 * 24 * 60 * 60 * 1000;
        let foreign = RiskEvent::new(other.id, RiskEventType::VmDetected, 40, "vm", None);
        for e in [&recent, &old, &foreign] {
            repo.append(e).await.unwrap();
        }

        let since = recent.created_at_ms - 7 * 24 * 60 * 60 * 1000;
        assert_eq!(repo.count_since("u", "l", since).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_locations_newest_first_and_limited() {
        let repo = MemoryLoaderRepository::new();
        for (i, loc) in ["A", "B", "C"].iter().enumerate() {
            let mut attempt = LoginAttempt::new(
                Some("u".into()),
                "user",
                true,
                None,
                Some(loc.to_string()),
                None,
            );
            attempt.created_at_ms += i as i64;
            repo.record(&attempt).await.unwrap();
        }

        let locations = repo.recent_locations("u", 0, 2).await.unwrap();
        assert_eq!(locations, vec![Some("C".to_string()), Some("B".to_string())]);
    }
}
