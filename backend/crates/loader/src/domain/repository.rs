//! Repository Traits
//!
//! Interfaces for data persistence and the external license authority.
//! Implementations live in the infrastructure layer.

use crate::domain::entities::{
    DeviceRecord, HandshakeSession, LoaderSession, LoginAttempt, RiskEvent,
};
use crate::domain::value_objects::RiskScore;
use crate::error::LoaderResult;
use kernel::id::{DeviceRecordId, HandshakeSessionId, LoaderSessionId};

/// Pending handshake sessions
#[trait_variant::make(HandshakeSessionStore: Send)]
pub trait LocalHandshakeSessionStore {
    async fn put(&self, session: &HandshakeSession) -> LoaderResult<()>;

    /// Remove and return a session atomically
    ///
    /// Of any number of concurrent callers for one id, at most one sees `Some`.
    async fn take(&self, session_id: HandshakeSessionId)
    -> LoaderResult<Option<HandshakeSession>>;

    /// Delete sessions created before `cutoff_ms`, returning how many went
    async fn sweep_expired(&self, cutoff_ms: i64) -> LoaderResult<u64>;
}

/// Established loader sessions
#[trait_variant::make(LoaderSessionStore: Send)]
pub trait LocalLoaderSessionStore {
    async fn insert_session(&self, session: &LoaderSession) -> LoaderResult<()>;

    async fn find_session(&self, session_id: LoaderSessionId) -> LoaderResult<Option<LoaderSession>>;

    /// Attach the authority identity. False if the session is gone or revoked.
    async fn bind_session_user(
        &self,
        session_id: LoaderSessionId,
        user_id: &str,
        license_id: &str,
    ) -> LoaderResult<bool>;

    /// Record a heartbeat at `now_ms`. False if the session is gone, revoked
    /// or expired.
    async fn touch_session(&self, session_id: LoaderSessionId, now_ms: i64) -> LoaderResult<bool>;

    /// Deactivate permanently. False if it was not active.
    async fn revoke_session(&self, session_id: LoaderSessionId) -> LoaderResult<bool>;

    /// Delete sessions that expired before `now_ms`
    async fn purge_sessions(&self, now_ms: i64) -> LoaderResult<u64>;
}

/// Consumed request nonces
#[trait_variant::make(NonceRepository: Send)]
pub trait LocalNonceRepository {
    /// Insert the nonce unless it already exists
    /// Returns true only for the caller that inserted it
    async fn insert_if_absent(&self, nonce: &str, expires_at_ms: i64) -> LoaderResult<bool>;

    /// Purge nonces whose expiry is before `now_ms`
    async fn purge_expired(&self, now_ms: i64) -> LoaderResult<u64>;
}

/// Device records per user+license pair
#[trait_variant::make(DeviceRecordRepository: Send)]
pub trait LocalDeviceRecordRepository {
    /// Most recently seen record for the pair
    async fn find(&self, user_id: &str, license_id: &str) -> LoaderResult<Option<DeviceRecord>>;

    /// Store `record` unless the pair already has one, atomically
    ///
    /// Returns the pair's current record and whether `record` was inserted.
    /// Concurrent first sightings of one pair yield exactly one insert.
    async fn find_or_create(&self, record: &DeviceRecord) -> LoaderResult<(DeviceRecord, bool)>;

    /// Persist components, composite, change count and last-seen
    async fn update(&self, record: &DeviceRecord) -> LoaderResult<()>;

    async fn count(&self, user_id: &str, license_id: &str) -> LoaderResult<u64>;

    /// Mark for manual review. Returns false if the record does not exist.
    async fn set_flag(&self, record_id: DeviceRecordId, reason: &str) -> LoaderResult<bool>;

    async fn record_risk_score(&self, record_id: DeviceRecordId, score: RiskScore)
    -> LoaderResult<()>;
}

/// Append-only risk event log
#[trait_variant::make(RiskEventRepository: Send)]
pub trait LocalRiskEventRepository {
    async fn append(&self, event: &RiskEvent) -> LoaderResult<()>;

    /// Events for any device record of the pair created at or after `since_ms`
    async fn count_since(&self, user_id: &str, license_id: &str, since_ms: i64)
    -> LoaderResult<u64>;
}

/// Append-only login attempt log
#[trait_variant::make(LoginLogRepository: Send)]
pub trait LocalLoginLogRepository {
    async fn record(&self, attempt: &LoginAttempt) -> LoaderResult<()>;

    /// Geo locations of the user's newest `limit` logins since `since_ms`,
    /// newest first
    async fn recent_locations(
        &self,
        user_id: &str,
        since_ms: i64,
        limit: usize,
    ) -> LoaderResult<Vec<Option<String>>>;
}

/// Outcome of a license authority check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityVerdict {
    pub success: bool,
    pub message: String,
    /// Authority-side user identifier, when the check succeeded
    pub user_id: Option<String>,
    pub license_id: Option<String>,
}

impl AuthorityVerdict {
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            user_id: None,
            license_id: None,
        }
    }
}

/// Third-party license authority
///
/// A negative verdict is a value; only transport failures are errors.
#[trait_variant::make(LicenseAuthority: Send)]
pub trait LocalLicenseAuthority {
    async fn verify(&self, username: &str, password: &str, hwid: &str)
    -> LoaderResult<AuthorityVerdict>;

    async fn verify_license(&self, license_key: &str, hwid: &str) -> LoaderResult<AuthorityVerdict>;
}

/// Every store port, as one bound for callers that keep a single backend
pub trait LoaderStore:
    HandshakeSessionStore
    + LoaderSessionStore
    + NonceRepository
    + DeviceRecordRepository
    + RiskEventRepository
    + LoginLogRepository
    + Send
    + Sync
    + 'static
{
}

impl<T> LoaderStore for T where
    T: HandshakeSessionStore
        + LoaderSessionStore
        + NonceRepository
        + DeviceRecordRepository
        + RiskEventRepository
        + LoginLogRepository
        + Send
        + Sync
        + 'static
{
}
