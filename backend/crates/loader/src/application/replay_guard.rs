//! Replay Guard
//!
//! Every signed request carries a nonce, a millisecond timestamp and an
//! HMAC-SHA256 over `"{nonce}.{timestamp}.{body}"`. Checks run in order:
//! signature, then timestamp window, then nonce uniqueness. A request that
//! fails an earlier check never consumes its nonce.

use crate::application::bounded;
use crate::application::config::LoaderConfig;
use crate::domain::repository::NonceRepository;
use crate::error::{LoaderError, LoaderResult};
use chrono::Utc;
use platform::crypto::CryptoProvider;
use std::sync::Arc;

/// Bytes covered by a request signature
pub fn request_payload(nonce: &str, timestamp_ms: i64, body: &[u8]) -> Vec<u8> {
    let prefix = format!("{nonce}.{timestamp_ms}.");
    let mut payload = Vec::with_capacity(prefix.len() + body.len());
    payload.extend_from_slice(prefix.as_bytes());
    payload.extend_from_slice(body);
    payload
}

/// Parts of a signed request
#[derive(Debug, Clone, Copy)]
pub struct SignedRequest<'a> {
    pub nonce: &'a str,
    pub timestamp_ms: i64,
    pub signature: &'a str,
    pub body: &'a [u8],
}

pub struct ReplayGuard<N>
where
    N: NonceRepository,
{
    nonces: Arc<N>,
    crypto: Arc<CryptoProvider>,
    config: Arc<LoaderConfig>,
}

impl<N> ReplayGuard<N>
where
    N: NonceRepository,
{
    pub fn new(nonces: Arc<N>, crypto: Arc<CryptoProvider>, config: Arc<LoaderConfig>) -> Self {
        Self {
            nonces,
            crypto,
            config,
        }
    }

    /// Accept a nonce exactly once within its TTL
    pub async fn validate_nonce(&self, nonce: &str) -> LoaderResult<()> {
        if nonce.is_empty() {
            return Err(LoaderError::Protocol("empty nonce".into()));
        }

        let expires_at_ms = Utc::now().timestamp_millis() + self.config.nonce_ttl_ms();
        let inserted = bounded(
            self.config.store_timeout,
            "nonce.insert",
            self.nonces.insert_if_absent(nonce, expires_at_ms),
        )
        .await?;

        if !inserted {
            tracing::warn!(nonce = %nonce, "Replayed nonce rejected");
            return Err(LoaderError::ReplayDetected);
        }
        Ok(())
    }

    pub fn validate_timestamp(&self, timestamp_ms: i64) -> LoaderResult<()> {
        self.validate_timestamp_at(timestamp_ms, Utc::now().timestamp_millis())
    }

    /// Symmetric window: accept iff |now - t| <= window
    pub fn validate_timestamp_at(&self, timestamp_ms: i64, now_ms: i64) -> LoaderResult<()> {
        let skew = now_ms.saturating_sub(timestamp_ms).saturating_abs();
        if skew > self.config.timestamp_window_ms() {
            tracing::warn!(skew_ms = skew, "Request timestamp outside window");
            return Err(LoaderError::StaleTimestamp);
        }
        Ok(())
    }

    pub fn validate_signature(
        &self,
        payload: &[u8],
        signature_hex: &str,
        secret: &[u8],
    ) -> LoaderResult<()> {
        if self.crypto.hmac_verify(payload, signature_hex, secret) {
            Ok(())
        } else {
            Err(LoaderError::RequestSignatureInvalid)
        }
    }

    /// Full check of a signed request under the configured request secret
    pub async fn check_request(&self, request: SignedRequest<'_>) -> LoaderResult<()> {
        let payload = request_payload(request.nonce, request.timestamp_ms, request.body);
        self.validate_signature(&payload, request.signature, &self.config.request_secret)?;
        self.validate_timestamp(request.timestamp_ms)?;
        self.validate_nonce(request.nonce).await
    }

    /// Sign a payload with the configured request secret (for trusted clients and tests)
    pub fn sign_request(&self, nonce: &str, timestamp_ms: i64, body: &[u8]) -> LoaderResult<String> {
        let payload = request_payload(nonce, timestamp_ms, body);
        Ok(self.crypto.hmac_sign(&payload, &self.config.request_secret)?)
    }

    /// Purge nonces past their expiry
    pub async fn sweep_expired(&self) -> LoaderResult<u64> {
        bounded(
            self.config.store_timeout,
            "nonce.purge",
            self.nonces.purge_expired(Utc::now().timestamp_millis()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_payload_layout() {
        assert_eq!(request_payload("abc", 1700, b"{}"), b"abc.1700.{}".to_vec());
        assert_eq!(request_payload("n", -5, b""), b"n.-5.".to_vec());
    }
}
