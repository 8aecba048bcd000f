//! Loader Sessions
//!
//! A completed handshake becomes a session: the negotiated AES key, the
//! origin it was negotiated from, and a 24h lifetime. Every protected request
//! presents the session token; the session is looked up, checked for
//! revocation, expiry and origin, and its key opens the sealed payload.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::application::session_token::{create_session_token, verify_session_token};
use crate::domain::entities::LoaderSession;
use crate::domain::repository::LoaderSessionStore;
use crate::error::{LoaderError, LoaderResult};
use chrono::Utc;
use kernel::id::LoaderSessionId;
use platform::crypto::{CryptoProvider, SessionKey};
use std::net::IpAddr;
use std::sync::Arc;

/// Output DTO for establish
#[derive(Debug)]
pub struct EstablishedSession {
    pub session: LoaderSession,
    pub token: String,
}

pub struct SessionManager<T>
where
    T: LoaderSessionStore,
{
    sessions: Arc<T>,
    crypto: Arc<CryptoProvider>,
    config: Arc<LoaderConfig>,
}

impl<T> SessionManager<T>
where
    T: LoaderSessionStore,
{
    pub fn new(sessions: Arc<T>, crypto: Arc<CryptoProvider>, config: Arc<LoaderConfig>) -> Self {
        Self {
            sessions,
            crypto,
            config,
        }
    }

    /// Persist a session for a freshly negotiated key and mint its token
    pub async fn establish(
        &self,
        session_key: SessionKey,
        device_fingerprint: &str,
        origin: IpAddr,
    ) -> LoaderResult<EstablishedSession> {
        let session = LoaderSession::new(
            session_key,
            device_fingerprint.to_string(),
            origin,
            self.config.session_ttl_ms(),
        );
        let token = create_session_token(&self.crypto, &session.id, &self.config.session_secret)?;

        bounded(
            self.config.store_timeout,
            "session.insert",
            self.sessions.insert_session(&session),
        )
        .await?;

        tracing::info!(
            loader_session_id = %session.id,
            origin = %origin,
            expires_at_ms = session.expires_at_ms,
            "Loader session established"
        );

        Ok(EstablishedSession { session, token })
    }

    /// Resolve a presented token to its live session
    ///
    /// Forged, unknown, revoked and expired tokens are all `InvalidSessionToken`;
    /// a live token presented from another address is `OriginMismatch`.
    pub async fn authenticate(&self, token: &str, origin: IpAddr) -> LoaderResult<LoaderSession> {
        let session_id = verify_session_token(&self.crypto, token, &self.config.session_secret)?;

        let session = bounded(
            self.config.store_timeout,
            "session.find",
            self.sessions.find_session(session_id),
        )
        .await?
        .ok_or(LoaderError::InvalidSessionToken)?;

        if !session.is_active {
            tracing::info!(loader_session_id = %session.id, "Revoked session presented");
            return Err(LoaderError::InvalidSessionToken);
        }

        if session.is_expired_at(Utc::now().timestamp_millis()) {
            tracing::info!(loader_session_id = %session.id, "Expired session presented");
            return Err(LoaderError::InvalidSessionToken);
        }

        if session.origin != origin {
            tracing::warn!(
                loader_session_id = %session.id,
                expected = %session.origin,
                actual = %origin,
                "Session origin mismatch"
            );
            return Err(LoaderError::OriginMismatch);
        }

        Ok(session)
    }

    /// Attach the authority identity after a successful login
    pub async fn bind_user(
        &self,
        session_id: LoaderSessionId,
        user_id: &str,
        license_id: &str,
    ) -> LoaderResult<()> {
        let bound = bounded(
            self.config.store_timeout,
            "session.bind_user",
            self.sessions.bind_session_user(session_id, user_id, license_id),
        )
        .await?;
        if !bound {
            return Err(LoaderError::InvalidSessionToken);
        }
        tracing::debug!(loader_session_id = %session_id, user_id = %user_id, "Session bound to user");
        Ok(())
    }

    pub async fn record_heartbeat(&self, session_id: LoaderSessionId) -> LoaderResult<()> {
        let touched = bounded(
            self.config.store_timeout,
            "session.touch",
            self.sessions
                .touch_session(session_id, Utc::now().timestamp_millis()),
        )
        .await?;
        if !touched {
            return Err(LoaderError::InvalidSessionToken);
        }
        Ok(())
    }

    /// Deactivate a session for good. Returns false if it was already inactive.
    pub async fn revoke(&self, session_id: LoaderSessionId, reason: &str) -> LoaderResult<bool> {
        let revoked = bounded(
            self.config.store_timeout,
            "session.revoke",
            self.sessions.revoke_session(session_id),
        )
        .await?;
        if revoked {
            tracing::info!(loader_session_id = %session_id, reason = %reason, "Session revoked");
        }
        Ok(revoked)
    }

    /// Delete sessions past their expiry
    pub async fn sweep_expired(&self) -> LoaderResult<u64> {
        bounded(
            self.config.store_timeout,
            "session.sweep",
            self.sessions.purge_sessions(Utc::now().timestamp_millis()),
        )
        .await
    }
}
