//! PostgreSQL Repository Implementations

use crate::domain::entities::{
    DeviceRecord, HandshakeSession, LoaderSession, LoginAttempt, RiskEvent,
};
use crate::domain::repository::{
    DeviceRecordRepository, HandshakeSessionStore, LoaderSessionStore, LoginLogRepository,
    NonceRepository, RiskEventRepository,
};
use crate::domain::value_objects::{FingerprintComponents, RiskScore};
use crate::error::{LoaderError, LoaderResult};
use chrono::{DateTime, Utc};
use kernel::id::{DeviceRecordId, HandshakeSessionId, LoaderSessionId};
use platform::crypto::SessionKey;
use sqlx::PgPool;
use std::net::IpAddr;
use uuid::Uuid;

/// Newest record for a (user_id, license_id) pair
const NEWEST_DEVICE_RECORD: &str = r#"
    SELECT
        device_record_id,
        user_id,
        license_id,
        composite_fingerprint,
        cpu_id,
        disk_serial,
        mac_hash,
        bios_hash,
        os_hash,
        trust_score,
        risk_score,
        change_count,
        is_flagged,
        flag_reason,
        first_seen_at,
        last_seen_at
    FROM loader_device_records
    WHERE user_id = $1 AND license_id = $2
    ORDER BY last_seen_at DESC
    LIMIT 1
"#;

/// PostgreSQL-backed repository
#[derive(Clone)]
pub struct PgLoaderRepository {
    pool: PgPool,
}

impl PgLoaderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl HandshakeSessionStore for PgLoaderRepository {
    async fn put(&self, session: &HandshakeSession) -> LoaderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loader_handshake_sessions (
                handshake_session_id,
                challenge,
                server_public_key,
                device_fingerprint,
                origin,
                created_at_ms
            ) VALUES ($1, $2, $3, $4, $5::inet, $6)
            "#,
        )
        .bind(session.id.into_uuid())
        .bind(&session.challenge)
        .bind(&session.server_public_key)
        .bind(&session.device_fingerprint)
        .bind(session.origin.to_string())
        .bind(session.created_at_ms)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take(
        &self,
        session_id: HandshakeSessionId,
    ) -> LoaderResult<Option<HandshakeSession>> {
        let row = sqlx::query_as::<_, HandshakeSessionRow>(
            r#"
            DELETE FROM loader_handshake_sessions
            WHERE handshake_session_id = $1
            RETURNING
                handshake_session_id,
                challenge,
                server_public_key,
                device_fingerprint,
                host(origin) AS origin,
                created_at_ms
            "#,
        )
        .bind(session_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(HandshakeSessionRow::into_session).transpose()
    }

    async fn sweep_expired(&self, cutoff_ms: i64) -> LoaderResult<u64> {
        let deleted = sqlx::query("DELETE FROM loader_handshake_sessions WHERE created_at_ms < $1")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

impl LoaderSessionStore for PgLoaderRepository {
    async fn insert_session(&self, session: &LoaderSession) -> LoaderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loader_sessions (
                loader_session_id,
                session_key,
                device_fingerprint,
                origin,
                user_id,
                license_id,
                created_at_ms,
                expires_at_ms,
                last_heartbeat_ms,
                is_active
            ) VALUES ($1, $2, $3, $4::inet, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(session.id.into_uuid())
        .bind(session.session_key.to_hex())
        .bind(&session.device_fingerprint)
        .bind(session.origin.to_string())
        .bind(&session.user_id)
        .bind(&session.license_id)
        .bind(session.created_at_ms)
        .bind(session.expires_at_ms)
        .bind(session.last_heartbeat_ms)
        .bind(session.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_session(&self, session_id: LoaderSessionId) -> LoaderResult<Option<LoaderSession>> {
        let row = sqlx::query_as::<_, LoaderSessionRow>(
            r#"
            SELECT
                loader_session_id,
                session_key,
                device_fingerprint,
                host(origin) AS origin,
                user_id,
                license_id,
                created_at_ms,
                expires_at_ms,
                last_heartbeat_ms,
                is_active
            FROM loader_sessions
            WHERE loader_session_id = $1
            "#,
        )
        .bind(session_id.into_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(LoaderSessionRow::into_session).transpose()
    }

    async fn bind_session_user(
        &self,
        session_id: LoaderSessionId,
        user_id: &str,
        license_id: &str,
    ) -> LoaderResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE loader_sessions
            SET user_id = $2, license_id = $3
            WHERE loader_session_id = $1 AND is_active
            "#,
        )
        .bind(session_id.into_uuid())
        .bind(user_id)
        .bind(license_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn touch_session(&self, session_id: LoaderSessionId, now_ms: i64) -> LoaderResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE loader_sessions
            SET last_heartbeat_ms = $2
            WHERE loader_session_id = $1 AND is_active AND expires_at_ms >= $2
            "#,
        )
        .bind(session_id.into_uuid())
        .bind(now_ms)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn revoke_session(&self, session_id: LoaderSessionId) -> LoaderResult<bool> {
        let updated = sqlx::query(
            "UPDATE loader_sessions SET is_active = FALSE WHERE loader_session_id = $1 AND is_active",
        )
        .bind(session_id.into_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn purge_sessions(&self, now_ms: i64) -> LoaderResult<u64> {
        let deleted = sqlx::query("DELETE FROM loader_sessions WHERE expires_at_ms < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(deleted)
    }
}

impl NonceRepository for PgLoaderRepository {
    async fn insert_if_absent(&self, nonce: &str, expires_at_ms: i64) -> LoaderResult<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO loader_nonces (nonce, expires_at_ms)
            VALUES ($1, $2)
            ON CONFLICT (nonce) DO NOTHING
            "#,
        )
        .bind(nonce)
        .bind(expires_at_ms)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn purge_expired(&self, now_ms: i64) -> LoaderResult<u64> {
        let purged = sqlx::query("DELETE FROM loader_nonces WHERE expires_at_ms < $1")
            .bind(now_ms)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(purged)
    }
}

impl DeviceRecordRepository for PgLoaderRepository {
    async fn find(&self, user_id: &str, license_id: &str) -> LoaderResult<Option<DeviceRecord>> {
        let row = sqlx::query_as::<_, DeviceRecordRow>(NEWEST_DEVICE_RECORD)
        .bind(user_id)
        .bind(license_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DeviceRecordRow::into_record))
    }

    async fn find_or_create(&self, record: &DeviceRecord) -> LoaderResult<(DeviceRecord, bool)> {
        let mut tx = self.pool.begin().await?;

        // Serializes first sightings of one pair; released at commit
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1 || '|' || $2))")
            .bind(&record.user_id)
            .bind(&record.license_id)
            .execute(&mut *tx)
            .await?;

        let existing = sqlx::query_as::<_, DeviceRecordRow>(NEWEST_DEVICE_RECORD)
        .bind(&record.user_id)
        .bind(&record.license_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Ok((row.into_record(), false));
        }

        let c = &record.components;
        sqlx::query(
            r#"
            INSERT INTO loader_device_records (
                device_record_id,
                user_id,
                license_id,
                composite_fingerprint,
                cpu_id,
                disk_serial,
                mac_hash,
                bios_hash,
                os_hash,
                trust_score,
                risk_score,
                change_count,
                is_flagged,
                flag_reason,
                first_seen_at,
                last_seen_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id.into_uuid())
        .bind(&record.user_id)
        .bind(&record.license_id)
        .bind(&record.composite_fingerprint)
        .bind(&c.cpu_id)
        .bind(&c.disk_serial)
        .bind(&c.mac_hash)
        .bind(&c.bios_hash)
        .bind(&c.os_hash)
        .bind(record.trust_score)
        .bind(i16::from(record.risk_score.value()))
        .bind(record.change_count as i32)
        .bind(record.is_flagged)
        .bind(&record.flag_reason)
        .bind(record.first_seen_at)
        .bind(record.last_seen_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(device_record_id = %record.id, "Device record created");
        Ok((record.clone(), true))
    }

    async fn update(&self, record: &DeviceRecord) -> LoaderResult<()> {
        let c = &record.components;
        let updated = sqlx::query(
            r#"
            UPDATE loader_device_records
            SET composite_fingerprint = $2,
                cpu_id = $3,
                disk_serial = $4,
                mac_hash = $5,
                bios_hash = $6,
                os_hash = $7,
                change_count = $8,
                last_seen_at = $9
            WHERE device_record_id = $1
            "#,
        )
        .bind(record.id.into_uuid())
        .bind(&record.composite_fingerprint)
        .bind(&c.cpu_id)
        .bind(&c.disk_serial)
        .bind(&c.mac_hash)
        .bind(&c.bios_hash)
        .bind(&c.os_hash)
        .bind(record.change_count as i32)
        .bind(record.last_seen_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(LoaderError::Internal(format!(
                "device record {} missing",
                record.id
            )));
        }
        Ok(())
    }

    async fn count(&self, user_id: &str, license_id: &str) -> LoaderResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM loader_device_records WHERE user_id = $1 AND license_id = $2",
        )
        .bind(user_id)
        .bind(license_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn set_flag(&self, record_id: DeviceRecordId, reason: &str) -> LoaderResult<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE loader_device_records
            SET is_flagged = TRUE, flag_reason = $2
            WHERE device_record_id = $1
            "#,
        )
        .bind(record_id.into_uuid())
        .bind(reason)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(updated == 1)
    }

    async fn record_risk_score(
        &self,
        record_id: DeviceRecordId,
        score: RiskScore,
    ) -> LoaderResult<()> {
        sqlx::query("UPDATE loader_device_records SET risk_score = $2 WHERE device_record_id = $1")
            .bind(record_id.into_uuid())
            .bind(i16::from(score.value()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl RiskEventRepository for PgLoaderRepository {
    async fn append(&self, event: &RiskEvent) -> LoaderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loader_risk_events (
                risk_event_id,
                device_record_id,
                event_type,
                severity,
                description,
                metadata,
                created_at_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id.into_uuid())
        .bind(event.device_record_id.into_uuid())
        .bind(event.event_type.as_str())
        .bind(i16::from(event.severity))
        .bind(&event.description)
        .bind(&event.metadata)
        .bind(event.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_since(
        &self,
        user_id: &str,
        license_id: &str,
        since_ms: i64,
    ) -> LoaderResult<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM loader_risk_events e
            JOIN loader_device_records d ON d.device_record_id = e.device_record_id
            WHERE d.user_id = $1 AND d.license_id = $2 AND e.created_at_ms >= $3
            "#,
        )
        .bind(user_id)
        .bind(license_id)
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }
}

impl LoginLogRepository for PgLoaderRepository {
    async fn record(&self, attempt: &LoginAttempt) -> LoaderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loader_login_attempts (
                login_attempt_id,
                user_id,
                username,
                success,
                source_ip,
                geo_location,
                user_agent,
                created_at_ms
            ) VALUES ($1, $2, $3, $4, $5::inet, $6, $7, $8)
            "#,
        )
        .bind(attempt.id.into_uuid())
        .bind(&attempt.user_id)
        .bind(&attempt.username)
        .bind(attempt.success)
        .bind(attempt.source_ip.as_ref().map(|ip| ip.to_string()))
        .bind(&attempt.geo_location)
        .bind(&attempt.user_agent)
        .bind(attempt.created_at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_locations(
        &self,
        user_id: &str,
        since_ms: i64,
        limit: usize,
    ) -> LoaderResult<Vec<Option<String>>> {
        let locations = sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT geo_location
            FROM loader_login_attempts
            WHERE user_id = $1 AND created_at_ms >= $2
            ORDER BY created_at_ms DESC
            LIMIT $3
            "#,
        )
        .bind(user_id)
        .bind(since_ms)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(locations)
    }
}

// Internal row types for sqlx mapping
#[derive(sqlx::FromRow)]
struct HandshakeSessionRow {
    handshake_session_id: Uuid,
    challenge: String,
    server_public_key: String,
    device_fingerprint: String,
    origin: String,
    created_at_ms: i64,
}

impl HandshakeSessionRow {
    fn into_session(self) -> LoaderResult<HandshakeSession> {
        let origin: IpAddr = self
            .origin
            .parse()
            .map_err(|_| LoaderError::Internal(format!("stored origin {:?}", self.origin)))?;
        Ok(HandshakeSession {
            id: HandshakeSessionId::from_uuid(self.handshake_session_id),
            challenge: self.challenge,
            server_public_key: self.server_public_key,
            device_fingerprint: self.device_fingerprint,
            origin,
            created_at_ms: self.created_at_ms,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LoaderSessionRow {
    loader_session_id: Uuid,
    session_key: String,
    device_fingerprint: String,
    origin: String,
    user_id: Option<String>,
    license_id: Option<String>,
    created_at_ms: i64,
    expires_at_ms: i64,
    last_heartbeat_ms: Option<i64>,
    is_active: bool,
}

impl LoaderSessionRow {
    fn into_session(self) -> LoaderResult<LoaderSession> {
        let origin: IpAddr = self
            .origin
            .parse()
            .map_err(|_| LoaderError::Internal(format!("stored origin {:?}", self.origin)))?;
        let session_key = SessionKey::from_hex(&self.session_key)
            .map_err(|_| LoaderError::Internal("stored session key unreadable".into()))?;
        Ok(LoaderSession {
            id: LoaderSessionId::from_uuid(self.loader_session_id),
            session_key,
            device_fingerprint: self.device_fingerprint,
            origin,
            user_id: self.user_id,
            license_id: self.license_id,
            created_at_ms: self.created_at_ms,
            expires_at_ms: self.expires_at_ms,
            last_heartbeat_ms: self.last_heartbeat_ms,
            is_active: self.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeviceRecordRow {
    device_record_id: Uuid,
    user_id: String,
    license_id: String,
    composite_fingerprint: String,
    cpu_id: Option<String>,
    disk_serial: Option<String>,
    mac_hash: Option<String>,
    bios_hash: Option<String>,
    os_hash: Option<String>,
    trust_score: f64,
    risk_score: i16,
    change_count: i32,
    is_flagged: bool,
    flag_reason: Option<String>,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl DeviceRecordRow {
    fn into_record(self) -> DeviceRecord {
        DeviceRecord {
            id: DeviceRecordId::from_uuid(self.device_record_id),
            user_id: self.user_id,
            license_id: self.license_id,
            composite_fingerprint: self.composite_fingerprint,
            components: FingerprintComponents {
                cpu_id: self.cpu_id,
                disk_serial: self.disk_serial,
                mac_hash: self.mac_hash,
                bios_hash: self.bios_hash,
                os_hash: self.os_hash,
            },
            trust_score: self.trust_score,
            risk_score: RiskScore::from_raw(self.risk_score.max(0) as u32),
            change_count: self.change_count.max(0) as u32,
            is_flagged: self.is_flagged,
            flag_reason: self.flag_reason,
            first_seen_at: self.first_seen_at,
            last_seen_at: self.last_seen_at,
        }
    }
}
