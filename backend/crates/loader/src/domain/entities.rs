//! Domain Entities
//!
//! Core business entities for the device-trust domain.

use crate::domain::value_objects::{FingerprintComponents, RiskEventType, RiskScore};
use chrono::{DateTime, Utc};
use kernel::id::{DeviceRecordId, HandshakeSessionId, LoaderSessionId, LoginAttemptId, RiskEventId};
use platform::crypto::SessionKey;
use std::net::IpAddr;

/// Pending handshake - binds one challenge to one requesting device
///
/// Lives only between initiate and complete (or the TTL sweep).
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    pub id: HandshakeSessionId,
    /// Hex-encoded challenge bytes
    pub challenge: String,
    /// Server public key handed out at initiation
    pub server_public_key: String,
    pub device_fingerprint: String,
    pub origin: IpAddr,
    pub created_at_ms: i64,
}

impl HandshakeSession {
    pub fn new(
        challenge: String,
        server_public_key: String,
        device_fingerprint: String,
        origin: IpAddr,
    ) -> Self {
        Self {
            id: HandshakeSessionId::new(),
            challenge,
            server_public_key,
            device_fingerprint,
            origin,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn is_expired_at(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.created_at_ms > ttl_ms
    }

    /// Check if the session has outlived `ttl_ms`
    pub fn is_expired(&self, ttl_ms: i64) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis(), ttl_ms)
    }
}

/// Session established by a completed handshake
///
/// Carries the negotiated AES key used to open sealed request payloads.
/// A login binds the authority identity to it; revocation is permanent.
#[derive(Debug, Clone)]
pub struct LoaderSession {
    pub id: LoaderSessionId,
    pub session_key: SessionKey,
    pub device_fingerprint: String,
    pub origin: IpAddr,
    pub user_id: Option<String>,
    pub license_id: Option<String>,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub last_heartbeat_ms: Option<i64>,
    pub is_active: bool,
}

impl LoaderSession {
    pub fn new(
        session_key: SessionKey,
        device_fingerprint: String,
        origin: IpAddr,
        ttl_ms: i64,
    ) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            id: LoaderSessionId::new(),
            session_key,
            device_fingerprint,
            origin,
            user_id: None,
            license_id: None,
            created_at_ms: now,
            expires_at_ms: now.saturating_add(ttl_ms),
            last_heartbeat_ms: None,
            is_active: true,
        }
    }

    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms > self.expires_at_ms
    }

    /// Authority identity bound by a successful login
    pub fn identity(&self) -> Option<(&str, &str)> {
        Some((self.user_id.as_deref()?, self.license_id.as_deref()?))
    }
}

/// Known device for a user+license pair
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceRecordId,
    pub user_id: String,
    pub license_id: String,
    pub composite_fingerprint: String,
    pub components: FingerprintComponents,
    pub trust_score: f64,
    pub risk_score: RiskScore,
    pub change_count: u32,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl DeviceRecord {
    /// Initial trust granted on first sighting
    pub const INITIAL_TRUST: f64 = 100.0;

    /// Create the record for a first sighting (provisional full trust)
    pub fn first_sighting(
        user_id: impl Into<String>,
        license_id: impl Into<String>,
        components: FingerprintComponents,
        composite_fingerprint: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DeviceRecordId::new(),
            user_id: user_id.into(),
            license_id: license_id.into(),
            composite_fingerprint,
            components,
            trust_score: Self::INITIAL_TRUST,
            risk_score: RiskScore::default(),
            change_count: 0,
            is_flagged: false,
            flag_reason: None,
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    /// Replace the stored observation with one that passed tolerance
    ///
    /// `changed` is false for an exact repeat, which must not count as churn.
    pub fn apply_observation(
        &mut self,
        components: FingerprintComponents,
        composite_fingerprint: String,
        changed: bool,
    ) {
        self.components = components;
        self.composite_fingerprint = composite_fingerprint;
        self.last_seen_at = Utc::now();
        if changed {
            self.change_count = self.change_count.saturating_add(1);
        }
    }
}

/// Append-only audit entry attached to a device record
#[derive(Debug, Clone)]
pub struct RiskEvent {
    pub id: RiskEventId,
    pub device_record_id: DeviceRecordId,
    pub event_type: RiskEventType,
    pub severity: u8,
    pub description: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at_ms: i64,
}

impl RiskEvent {
    pub fn new(
        device_record_id: DeviceRecordId,
        event_type: RiskEventType,
        severity: u8,
        description: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: RiskEventId::new(),
            device_record_id,
            event_type,
            severity,
            description: description.into(),
            metadata,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// Append-only login attempt, read back by the geo-velocity factor
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub id: LoginAttemptId,
    pub user_id: Option<String>,
    pub username: String,
    pub success: bool,
    pub source_ip: Option<IpAddr>,
    pub geo_location: Option<String>,
    pub user_agent: Option<String>,
    pub created_at_ms: i64,
}

impl LoginAttempt {
    pub fn new(
        user_id: Option<String>,
        username: impl Into<String>,
        success: bool,
        source_ip: Option<IpAddr>,
        geo_location: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: LoginAttemptId::new(),
            user_id,
            username: username.into(),
            success,
            source_ip,
            geo_location,
            user_agent,
            created_at_ms: Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_expiry_boundary() {
        let session = HandshakeSession::new(
            "ab".repeat(64),
            "pem".into(),
            "fp-123".into(),
            "1.2.3.4".parse().unwrap(),
        );
        let created = session.created_at_ms;

        assert!(!session.is_expired_at(created + 60_000, 60_000));
        assert!(session.is_expired_at(created + 60_001, 60_000));
        assert!(!session.is_expired(60_000));
    }

    #[test]
    fn test_loader_session_expiry_and_identity() {
        let mut session = LoaderSession::new(
            SessionKey::from_bytes([1u8; 32]),
            "fp-123".into(),
            "1.2.3.4".parse().unwrap(),
            1_000,
        );
        assert!(session.is_active);
        assert!(!session.is_expired_at(session.expires_at_ms));
        assert!(session.is_expired_at(session.expires_at_ms + 1));

        assert_eq!(session.identity(), None);
        session.user_id = Some("alice".into());
        assert_eq!(session.identity(), None);
        session.license_id = Some(String::new());
        assert_eq!(session.identity(), Some(("alice", "")));

        // The key never shows up in logs
        let key_hex = session.session_key.to_hex();
        assert!(!format!("{session:?}").contains(&key_hex));
    }

    #[test]
    fn test_first_sighting_defaults() {
        let record = DeviceRecord::first_sighting(
            "user-1",
            "lic-1",
            FingerprintComponents::default(),
            "deadbeef".into(),
        );
        assert_eq!(record.trust_score, 100.0);
        assert_eq!(record.risk_score.value(), 0);
        assert_eq!(record.change_count, 0);
        assert!(!record.is_flagged);
    }

    #[test]
    fn test_apply_observation_counts_only_changes() {
        let mut record = DeviceRecord::first_sighting(
            "user-1",
            "lic-1",
            FingerprintComponents::default(),
            "a".into(),
        );

        record.apply_observation(FingerprintComponents::default(), "a".into(), false);
        assert_eq!(record.change_count, 0);

        record.apply_observation(FingerprintComponents::default(), "b".into(), true);
        assert_eq!(record.change_count, 1);
        assert_eq!(record.composite_fingerprint, "b");
    }
}
