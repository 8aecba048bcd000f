//! Handshake Use Case
//!
//! Two-phase challenge-response key exchange:
//!
//! 1. `initiate` stores a pending session holding a fresh challenge and the
//!    requester's origin address.
//! 2. `complete` consumes that session exactly once. The caller must prove
//!    possession of the private key behind `client_public_key` by signing the
//!    challenge bytes; on success a fresh AES-256 session key is returned
//!    encrypted under that public key. The caller turns it into a session.
//!
//! Every failure in `complete` leaves the session deleted, so a rejected
//! session id can never be retried.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::domain::entities::HandshakeSession;
use crate::domain::repository::HandshakeSessionStore;
use crate::error::{LoaderError, LoaderResult};
use chrono::Utc;
use kernel::id::HandshakeSessionId;
use platform::crypto::{CryptoProvider, SessionKey};
use std::net::IpAddr;
use std::sync::Arc;

/// Output DTO for initiate
#[derive(Debug, Clone)]
pub struct InitiateHandshakeOutput {
    pub session_id: HandshakeSessionId,
    /// Hex-encoded challenge
    pub challenge: String,
    pub server_public_key: String,
}

/// Input DTO for complete
#[derive(Debug, Clone)]
pub struct CompleteHandshakeInput {
    pub session_id: HandshakeSessionId,
    /// Base64 PKCS#1 v1.5 / SHA-256 signature over the decoded challenge bytes
    pub signed_challenge: String,
    /// SPKI or PKCS#1 PEM
    pub client_public_key: String,
}

/// Output DTO for complete
#[derive(Debug)]
pub struct CompleteHandshakeOutput {
    pub session_id: HandshakeSessionId,
    pub device_fingerprint: String,
    /// Base64 RSA-OAEP ciphertext of the hex session key
    pub encrypted_session_key: String,
    /// Server-side copy of the negotiated key
    pub session_key: SessionKey,
}

/// Handshake coordinator
pub struct HandshakeCoordinator<S>
where
    S: HandshakeSessionStore,
{
    sessions: Arc<S>,
    crypto: Arc<CryptoProvider>,
    config: Arc<LoaderConfig>,
}

impl<S> HandshakeCoordinator<S>
where
    S: HandshakeSessionStore,
{
    pub fn new(sessions: Arc<S>, crypto: Arc<CryptoProvider>, config: Arc<LoaderConfig>) -> Self {
        Self {
            sessions,
            crypto,
            config,
        }
    }

    pub async fn initiate(
        &self,
        device_fingerprint: &str,
        origin: IpAddr,
    ) -> LoaderResult<InitiateHandshakeOutput> {
        let challenge = hex::encode(self.crypto.random_bytes(self.config.challenge_bytes_len));
        let session = HandshakeSession::new(
            challenge,
            self.crypto.public_key_pem().to_string(),
            device_fingerprint.to_string(),
            origin,
        );

        bounded(
            self.config.store_timeout,
            "handshake.put",
            self.sessions.put(&session),
        )
        .await?;

        tracing::info!(
            session_id = %session.id,
            origin = %origin,
            "Handshake initiated"
        );

        Ok(InitiateHandshakeOutput {
            session_id: session.id,
            challenge: session.challenge,
            server_public_key: session.server_public_key,
        })
    }

    pub async fn complete(
        &self,
        input: CompleteHandshakeInput,
        origin: IpAddr,
    ) -> LoaderResult<CompleteHandshakeOutput> {
        // Atomically consume the session; losers of a race see None
        let session = bounded(
            self.config.store_timeout,
            "handshake.take",
            self.sessions.take(input.session_id),
        )
        .await?
        .ok_or(LoaderError::SessionNotFound)?;

        if session.is_expired_at(Utc::now().timestamp_millis(), self.config.handshake_ttl_ms()) {
            tracing::info!(session_id = %session.id, "Handshake session expired");
            return Err(LoaderError::SessionNotFound);
        }

        if session.origin != origin {
            tracing::warn!(
                session_id = %session.id,
                expected = %session.origin,
                actual = %origin,
                "Handshake origin mismatch"
            );
            return Err(LoaderError::OriginMismatch);
        }

        let challenge_bytes = hex::decode(&session.challenge)
            .map_err(|e| LoaderError::Internal(format!("stored challenge: {e}")))?;

        if let Err(e) = self.crypto.verify_signature(
            &input.client_public_key,
            &challenge_bytes,
            &input.signed_challenge,
        ) {
            tracing::warn!(session_id = %session.id, error = %e, "Challenge signature rejected");
            return Err(e.into());
        }

        let session_key = self.crypto.generate_session_key();
        let encrypted_session_key = self
            .crypto
            .rsa_encrypt(session_key.to_hex().as_bytes(), Some(&input.client_public_key))?;

        tracing::info!(
            session_id = %session.id,
            device_fingerprint = %session.device_fingerprint,
            "Handshake completed"
        );

        Ok(CompleteHandshakeOutput {
            session_id: session.id,
            device_fingerprint: session.device_fingerprint,
            encrypted_session_key,
            session_key,
        })
    }

    /// Delete sessions older than the TTL
    pub async fn sweep_expired(&self) -> LoaderResult<u64> {
        let cutoff_ms = Utc::now().timestamp_millis() - self.config.handshake_ttl_ms();
        bounded(
            self.config.store_timeout,
            "handshake.sweep",
            self.sessions.sweep_expired(cutoff_ms),
        )
        .await
    }
}
