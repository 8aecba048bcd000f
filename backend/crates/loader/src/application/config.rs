//! Application Configuration
//!
//! Configuration for the loader application layer.

use std::net::IpAddr;
use std::time::Duration;

/// Loader application configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Challenge bytes length
    pub challenge_bytes_len: usize,
    /// Lifetime of a pending handshake
    pub handshake_ttl: Duration,
    pub handshake_sweep_interval: Duration,
    /// How long a consumed nonce is remembered
    pub nonce_ttl: Duration,
    pub nonce_sweep_interval: Duration,
    /// Lifetime of an established loader session
    pub session_ttl: Duration,
    pub session_sweep_interval: Duration,
    /// Accepted clock skew in either direction
    pub timestamp_window: Duration,
    /// Minimum similarity (percent) for a fingerprint to be accepted
    pub similarity_threshold: f64,
    /// Lookback for the geo-velocity factor
    pub geo_window: Duration,
    /// Number of recent logins inspected by the geo-velocity factor
    pub geo_sample_size: usize,
    /// Lookback for the prior-risk-events factor
    pub risk_event_window: Duration,
    /// Upper bound on any single store or authority call
    pub store_timeout: Duration,
    /// Upper bound on a license authority round trip
    pub authority_timeout: Duration,
    /// Session token secret key for HMAC signing (32 bytes)
    pub session_secret: [u8; 32],
    /// Shared secret for request signatures
    pub request_secret: Vec<u8>,
    /// Reverse proxies whose X-Forwarded-For entries are believed
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            challenge_bytes_len: 64,
            handshake_ttl: Duration::from_secs(60),
            handshake_sweep_interval: Duration::from_secs(60),
            nonce_ttl: Duration::from_secs(300),
            nonce_sweep_interval: Duration::from_secs(60),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            session_sweep_interval: Duration::from_secs(5 * 60),
            timestamp_window: Duration::from_secs(30),
            similarity_threshold: 60.0,
            geo_window: Duration::from_secs(24 * 60 * 60),
            geo_sample_size: 5,
            risk_event_window: Duration::from_secs(7 * 24 * 60 * 60),
            store_timeout: Duration::from_secs(5),
            authority_timeout: Duration::from_secs(15),
            session_secret: [0u8; 32],
            request_secret: Vec::new(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl LoaderConfig {
    /// Create config with random secrets (for development)
    pub fn with_random_secret() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::rng().fill_bytes(&mut secret);
        let mut request_secret = vec![0u8; 32];
        rand::rng().fill_bytes(&mut request_secret);
        Self {
            session_secret: secret,
            request_secret,
            ..Default::default()
        }
    }

    /// Create config for development (fixed request secret so local clients can sign)
    pub fn development() -> Self {
        Self {
            request_secret: b"development-request-secret".to_vec(),
            ..Self::with_random_secret()
        }
    }

    pub fn handshake_ttl_ms(&self) -> i64 {
        self.handshake_ttl.as_millis() as i64
    }

    pub fn nonce_ttl_ms(&self) -> i64 {
        self.nonce_ttl.as_millis() as i64
    }

    pub fn session_ttl_ms(&self) -> i64 {
        self.session_ttl.as_millis() as i64
    }

    pub fn timestamp_window_ms(&self) -> i64 {
        self.timestamp_window.as_millis() as i64
    }

    pub fn geo_window_ms(&self) -> i64 {
        self.geo_window.as_millis() as i64
    }

    pub fn risk_event_window_ms(&self) -> i64 {
        self.risk_event_window.as_millis() as i64
    }
}
